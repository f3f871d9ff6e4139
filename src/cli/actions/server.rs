use crate::api;
use crate::cli::actions::Action;
use anyhow::{Context, Result};
use rsa::{pkcs8::DecodePublicKey, RsaPublicKey};

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            owner_public_key,
            public_host,
            auth,
            security,
        } => {
            let pem = tokio::fs::read_to_string(&owner_public_key)
                .await
                .with_context(|| {
                    format!(
                        "Failed to read owner public key from {}",
                        owner_public_key.display()
                    )
                })?;
            let owner_key = RsaPublicKey::from_public_key_pem(&pem)
                .context("Failed to parse owner public key PEM")?;

            api::new(port, dsn, owner_key, public_host, auth, security).await?;
        }
    }

    Ok(())
}
