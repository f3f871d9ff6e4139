//! Email verification codes.
//!
//! At most one live code exists per user: issuing a new code deletes the old
//! one first. The delete-then-insert pair is not atomic against a concurrent
//! issue for the same user; the last insert wins and the loser's code simply
//! never resolves. That race is accepted, not worked around.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::models::VerificationCode;

use super::error::StoreError;

const CODE_BYTES: usize = 64;

/// Expiry offsets for newly issued verification codes.
#[derive(Clone, Copy, Debug)]
pub struct SecurityConfig {
    verification_expires_days: i64,
    verification_expires_hours: i64,
}

impl SecurityConfig {
    /// Default expiry: one day.
    #[must_use]
    pub fn new() -> Self {
        Self {
            verification_expires_days: 1,
            verification_expires_hours: 0,
        }
    }

    #[must_use]
    pub fn with_verification_expires_days(mut self, days: i64) -> Self {
        self.verification_expires_days = days;
        self
    }

    #[must_use]
    pub fn with_verification_expires_hours(mut self, hours: i64) -> Self {
        self.verification_expires_hours = hours;
        self
    }

    #[must_use]
    pub fn verification_ttl(&self) -> Duration {
        Duration::days(self.verification_expires_days)
            + Duration::hours(self.verification_expires_hours)
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// URL-safe random code. Long enough that collisions are effectively
/// impossible, but the issue loop still checks.
fn generate_code() -> String {
    let mut bytes = [0u8; CODE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn map_code(row: &sqlx::postgres::PgRow) -> VerificationCode {
    VerificationCode {
        id: row.get("id"),
        created_at: row.get("created_at"),
        user_id: row.get("user_id"),
        code: row.get("code"),
        expires: row.get("expires"),
    }
}

/// Store for verification codes.
pub struct Codes {
    pool: PgPool,
}

impl Codes {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Issue a fresh code for a user, replacing any live one.
    pub async fn issue(
        &self,
        user_id: Uuid,
        config: &SecurityConfig,
    ) -> Result<VerificationCode, StoreError> {
        let expires = Utc::now() + config.verification_ttl();

        // Regenerate until the candidate is unused for this user.
        let code = loop {
            let candidate = generate_code();
            if !self.code_taken(user_id, &candidate).await? {
                break candidate;
            }
        };

        let delete = "DELETE FROM secured.verification_codes WHERE user_id = $1";
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

        let insert = "INSERT INTO secured.verification_codes (user_id, code, expires) \
             VALUES ($1, $2, $3) RETURNING id, created_at, user_id, code, expires";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        let row = sqlx::query(insert)
            .bind(user_id)
            .bind(&code)
            .bind(expires)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        Ok(map_code(&row))
    }

    /// Resolve a code by value. The caller owns the expiry check.
    pub async fn get(&self, code: &str) -> Result<VerificationCode, StoreError> {
        let query = "SELECT id, created_at, user_id, code, expires \
             FROM secured.verification_codes WHERE code = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(code)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.map(|row| map_code(&row))
            .ok_or_else(|| StoreError::not_found("verification code", code))
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let query = "DELETE FROM secured.verification_codes WHERE id = $1";
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

    async fn code_taken(&self, user_id: Uuid, code: &str) -> Result<bool, StoreError> {
        let query = "SELECT 1 FROM secured.verification_codes WHERE user_id = $1 AND code = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(code)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_url_safe_and_unique() {
        let first = generate_code();
        let second = generate_code();
        assert_ne!(first, second);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        let decoded = URL_SAFE_NO_PAD.decode(first.as_bytes()).ok();
        assert_eq!(decoded.map(|bytes| bytes.len()), Some(CODE_BYTES));
    }

    #[test]
    fn security_config_ttl_combines_days_and_hours() {
        let config = SecurityConfig::new()
            .with_verification_expires_days(2)
            .with_verification_expires_hours(6);
        assert_eq!(config.verification_ttl(), Duration::hours(54));
    }

    #[test]
    fn security_config_defaults_to_one_day() {
        assert_eq!(SecurityConfig::new().verification_ttl(), Duration::days(1));
    }
}
