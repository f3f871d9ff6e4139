//! Challenge material for the owner-operator auth flow.
//!
//! The server proves nothing; the client proves possession of the owner
//! private key by decrypting the challenge and returning its MD5 digest.
//! MD5 is a wire-format commitment here, not a security boundary: the
//! secrecy lives in the RSA layer.

use md5::{Digest, Md5};
use rand::{rngs::OsRng, RngCore};
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

/// Challenge plaintext size in bytes.
pub const CHALLENGE_BYTES: usize = 32;

/// Fresh random challenge.
#[must_use]
pub fn generate() -> [u8; CHALLENGE_BYTES] {
    let mut bytes = [0u8; CHALLENGE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Encrypt a challenge with the owner public key (PKCS#1 v1.5).
pub fn encrypt(key: &RsaPublicKey, challenge: &[u8; CHALLENGE_BYTES]) -> rsa::Result<Vec<u8>> {
    key.encrypt(&mut OsRng, Pkcs1v15Encrypt, challenge)
}

/// The digest the client is expected to send back.
#[must_use]
pub fn expected_digest(challenge: &[u8; CHALLENGE_BYTES]) -> [u8; 16] {
    Md5::digest(challenge).into()
}

/// Byte-for-byte comparison of the client's response against the expected
/// digest.
#[must_use]
pub fn verify(challenge: &[u8; CHALLENGE_BYTES], response: &[u8]) -> bool {
    response == expected_digest(challenge).as_slice()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    // Small key keeps the test fast; PKCS#1 v1.5 with 512 bits still fits a
    // 32-byte plaintext.
    fn test_key() -> Option<RsaPrivateKey> {
        RsaPrivateKey::new(&mut OsRng, 512).ok()
    }

    #[test]
    fn challenge_round_trip_verifies() {
        let Some(private_key) = test_key() else {
            panic!("failed to generate test key");
        };
        let public_key = RsaPublicKey::from(&private_key);

        let challenge = generate();
        let ciphertext = encrypt(&public_key, &challenge).ok();
        let plaintext = ciphertext
            .and_then(|ciphertext| private_key.decrypt(Pkcs1v15Encrypt, &ciphertext).ok());

        let digest = plaintext.map(|plaintext| <[u8; 16]>::from(Md5::digest(&plaintext)));
        assert!(digest.is_some_and(|digest| verify(&challenge, &digest)));
    }

    #[test]
    fn tampered_digest_fails_verification() {
        let challenge = generate();
        let mut digest = expected_digest(&challenge);
        digest.reverse();
        assert!(!verify(&challenge, &digest));
    }

    #[test]
    fn wrong_length_response_fails_verification() {
        let challenge = generate();
        assert!(!verify(&challenge, b"short"));
        assert!(!verify(&challenge, &[0u8; 32]));
    }

    #[test]
    fn fresh_challenges_differ() {
        assert_ne!(generate(), generate());
    }
}
