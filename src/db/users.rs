//! User rows and their password material.
//!
//! Flow Overview:
//! 1) `create` hashes the password, derives a discriminator tag, and inserts
//!    the row plus its password in `secured.passwords`.
//! 2) Reads only ever return the public projection; secured columns stay in
//!    this module.
//! 3) `delete`/`mark_verified` are keyed by id and report `NotFound` for
//!    missing rows.

use argon2::{
    password_hash::{rand_core::OsRng as SaltRng, PasswordHash, SaltString},
    Argon2, PasswordHasher, PasswordVerifier,
};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use tracing::{error, Instrument};
use uuid::Uuid;

use crate::models::{PublicUser, UserStatus};

use super::error::StoreError;

const PUBLIC_COLUMNS: &str = "id, created_at, email, username, icon, bio, status_type, \
     status_text, last_online, is_online, is_banned, is_verified";

/// Store for user rows.
pub struct Users {
    pool: PgPool,
}

/// Hash a password for storage.
pub fn hash_password(password: &SecretString) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut SaltRng);
    Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| {
            error!("Failed to hash password: {err}");
            StoreError::Hash
        })
}

/// Check a password against a stored hash.
#[must_use]
pub fn verify_password(password: &SecretString, stored: &str) -> bool {
    PasswordHash::new(stored).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok()
    })
}

/// Derive the 6-digit discriminator tag appended to a username.
///
/// The digest of email+username is read as a decimal number and truncated to
/// its first six digits; on a `(username, tag)` collision the caller retries
/// with fresh salt bytes mixed in.
fn derive_tag(email: &str, username: &str, salt: Option<&[u8; 16]>) -> i32 {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update(username.as_bytes());
    if let Some(salt) = salt {
        hasher.update(salt);
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let decimal = u64::from_be_bytes(prefix).to_string();
    let digits = &decimal[..decimal.len().min(6)];
    digits.parse().unwrap_or_default()
}

fn map_user(row: &sqlx::postgres::PgRow) -> PublicUser {
    PublicUser {
        id: row.get("id"),
        created_at: row.get("created_at"),
        email: row.get("email"),
        username: row.get("username"),
        icon: row.get("icon"),
        bio: row.get("bio"),
        status: UserStatus {
            kind: row.get("status_type"),
            text: row.get("status_text"),
        },
        last_online: row.get("last_online"),
        is_online: row.get("is_online"),
        is_banned: row.get("is_banned"),
        is_verified: row.get("is_verified"),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

impl Users {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Existence check. Slightly cheaper than fetching the row.
    pub async fn id_exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let query = "SELECT 1 FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.is_some())
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        let query = "SELECT 1 FROM users WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get(&self, id: Uuid) -> Result<PublicUser, StoreError> {
        let query = format!("SELECT {PUBLIC_COLUMNS} FROM users WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.map(|row| map_user(&row))
            .ok_or_else(|| StoreError::not_found("user", id))
    }

    pub async fn get_by_email(&self, email: &str) -> Result<PublicUser, StoreError> {
        let query = format!("SELECT {PUBLIC_COLUMNS} FROM users WHERE email = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.map(|row| map_user(&row))
            .ok_or_else(|| StoreError::not_found("user", email))
    }

    /// Fetch one page of users, newest first.
    pub async fn page(&self, page: i64, page_size: i64) -> Result<Vec<PublicUser>, StoreError> {
        let query = format!(
            "SELECT {PUBLIC_COLUMNS} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let rows = sqlx::query(&query)
            .bind(page_size)
            .bind(page * page_size)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        Ok(rows.iter().map(map_user).collect())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        if !self.id_exists(id).await? {
            return Err(StoreError::not_found("user", id));
        }
        let query = "DELETE FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    /// Create a user plus their password row.
    ///
    /// The password is hashed before anything touches the database. A
    /// duplicate email reports `AlreadyExists`, either from the upfront probe
    /// or from the unique constraint when two signups race.
    pub async fn create(
        &self,
        email: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<PublicUser, StoreError> {
        let password_hash = hash_password(password)?;

        if self.email_exists(email).await? {
            return Err(StoreError::AlreadyExists(email.to_string()));
        }

        let mut tag = derive_tag(email, username, None);
        while self.tag_taken(username, tag).await? {
            let mut salt = [0u8; 16];
            rand::rngs::OsRng.fill_bytes(&mut salt);
            tag = derive_tag(email, username, Some(&salt));
        }

        let query = format!(
            "INSERT INTO users (email, username, tag) VALUES ($1, $2, $3) \
             RETURNING {PUBLIC_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        let row = sqlx::query(&query)
            .bind(email)
            .bind(username)
            .bind(tag)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::AlreadyExists(email.to_string())
                } else {
                    StoreError::Database(err)
                }
            })?;

        let user = map_user(&row);
        self.store_password_hash(user.id, &password_hash).await?;
        Ok(user)
    }

    /// Replace a user's password.
    pub async fn set_password(
        &self,
        user_id: Uuid,
        password: &SecretString,
    ) -> Result<(), StoreError> {
        let password_hash = hash_password(password)?;
        self.store_password_hash(user_id, &password_hash).await
    }

    /// Stored hash for a user, if one exists.
    pub async fn password_hash(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        let query = "SELECT hash FROM secured.passwords WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.map(|row| row.get("hash")))
    }

    pub async fn mark_verified(&self, id: Uuid) -> Result<(), StoreError> {
        let query = "UPDATE users SET is_verified = TRUE WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user", id));
        }
        Ok(())
    }

    async fn tag_taken(&self, username: &str, tag: i32) -> Result<bool, StoreError> {
        let query = "SELECT 1 FROM users WHERE username = $1 AND tag = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(username)
            .bind(tag)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.is_some())
    }

    async fn store_password_hash(&self, user_id: Uuid, hash: &str) -> Result<(), StoreError> {
        // Delete-then-insert keeps exactly one password row per user.
        let delete = "DELETE FROM secured.passwords WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        sqlx::query(delete)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await?;

        let insert = "INSERT INTO secured.passwords (user_id, hash) VALUES ($1, $2)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        sqlx::query(insert)
            .bind(user_id)
            .bind(hash)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_tag_is_stable_and_six_digits() {
        let first = derive_tag("a@example.com", "alice", None);
        let second = derive_tag("a@example.com", "alice", None);
        assert_eq!(first, second);
        assert!(first >= 0);
        assert!(first < 1_000_000);
    }

    #[test]
    fn derive_tag_changes_with_salt() {
        let unsalted = derive_tag("a@example.com", "alice", None);
        let salted = derive_tag("a@example.com", "alice", Some(&[7u8; 16]));
        assert_ne!(unsalted, salted);
    }

    #[test]
    fn password_round_trip_verifies() {
        let password = SecretString::from("correct horse battery staple");
        let hash = hash_password(&password).ok();
        assert!(hash.as_deref().is_some_and(|h| verify_password(&password, h)));
    }

    #[test]
    fn wrong_password_fails_verification() {
        let password = SecretString::from("correct horse battery staple");
        let hash = hash_password(&password).ok();
        let wrong = SecretString::from("incorrect horse");
        assert!(hash.as_deref().is_some_and(|h| !verify_password(&wrong, h)));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        let password = SecretString::from("anything");
        assert!(!verify_password(&password, "not-a-phc-string"));
    }
}
