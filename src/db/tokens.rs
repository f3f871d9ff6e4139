//! Bearer token rows and the login/verification flows built on them.

use secrecy::SecretString;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::models::{PublicUser, Token, TokenType};

use super::error::StoreError;
use super::users::{verify_password, Users};

/// Store for session tokens.
pub struct Tokens {
    pool: PgPool,
}

fn map_token(row: &sqlx::postgres::PgRow) -> Token {
    let raw_type: i16 = row.get("type");
    Token {
        id: row.get("id"),
        created_at: row.get("created_at"),
        user_id: row.get("user_id"),
        last_used: row.get("last_used"),
        // Unknown discriminants cannot be inserted through this store; treat
        // them as user tokens rather than faulting a read path.
        token_type: TokenType::try_from(raw_type).unwrap_or(TokenType::User),
    }
}

impl Tokens {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn users(&self) -> Users {
        Users::new(self.pool.clone())
    }

    /// Issue a new token for a user.
    pub async fn issue(&self, user_id: Uuid, token_type: TokenType) -> Result<Token, StoreError> {
        let query = "INSERT INTO secured.tokens (user_id, type) VALUES ($1, $2) \
             RETURNING id, created_at, user_id, last_used, type";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(token_type.as_i16())
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        Ok(map_token(&row))
    }

    pub async fn exists(&self, token_id: Uuid) -> Result<bool, StoreError> {
        let query = "SELECT 1 FROM secured.tokens WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get(&self, token_id: Uuid) -> Result<Token, StoreError> {
        let query = "SELECT id, created_at, user_id, last_used, type \
             FROM secured.tokens WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.map(|row| map_token(&row))
            .ok_or_else(|| StoreError::not_found("token", token_id))
    }

    /// All tokens owned by a user.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Token>, StoreError> {
        let query = "SELECT id, created_at, user_id, last_used, type \
             FROM secured.tokens WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        Ok(rows.iter().map(map_token).collect())
    }

    /// Revoke a token.
    pub async fn delete(&self, token_id: Uuid) -> Result<(), StoreError> {
        let query = "DELETE FROM secured.tokens WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        let result = sqlx::query(query)
            .bind(token_id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("token", token_id));
        }
        Ok(())
    }

    /// Log a user in: resolve by email, check the password, issue a token.
    pub async fn session_new(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Token, StoreError> {
        let users = self.users();
        let user = users.get_by_email(email).await?;

        let stored = users.password_hash(user.id).await?;
        let verified = stored
            .as_deref()
            .is_some_and(|hash| verify_password(password, hash));
        if !verified {
            return Err(StoreError::PasswordIncorrect(email.to_string()));
        }

        self.issue(user.id, TokenType::User).await
    }

    /// Resolve a (email, token) pair to its user.
    ///
    /// Yields `None` unless the token's owning user and the user resolved by
    /// email are the same identity; a hit also touches `last_used`.
    pub async fn session_verify(
        &self,
        email: &str,
        token_id: Uuid,
    ) -> Result<Option<PublicUser>, StoreError> {
        let token = match self.get(token_id).await {
            Ok(token) => token,
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };

        let user = match self.users().get_by_email(email).await {
            Ok(user) => user,
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };

        if user.id != token.user_id {
            return Ok(None);
        }

        self.touch(token_id).await?;
        Ok(Some(user))
    }

    async fn touch(&self, token_id: Uuid) -> Result<(), StoreError> {
        let query = "UPDATE secured.tokens SET last_used = NOW() WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        sqlx::query(query)
            .bind(token_id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}
