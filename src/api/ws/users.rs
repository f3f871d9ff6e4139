//! Users target worker: self-service account actions.

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::error;

use crate::db::{Database, StoreError};

use super::envelope::ERR_INVALID_DATA;
use super::{Closed, WsConnection, WsState};

/// Routing key this worker is registered under.
pub const TARGET: &str = "users";

const ERR_INVALID_ACTION: &str = "Invalid action.";
const ERR_USER_EXISTS: &str = "User already exists.";
const ERR_USER_MISSING: &str = "User does not exist.";
const ERR_PASSWORD_INCORRECT: &str = "Incorrect password.";
const ERR_INTERNAL: &str = "Internal error.";

const MIN_PASSWORD_CHARS: usize = 8;

#[derive(Debug, Deserialize)]
struct NewUserInput {
    email: String,
    username: String,
    password: SecretString,
}

#[derive(Debug, Deserialize)]
struct LoginInput {
    email: String,
    password: SecretString,
}

fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

fn valid_username(username: &str) -> bool {
    !username.trim().is_empty()
}

fn valid_password(password: &SecretString) -> bool {
    password.expose_secret().chars().count() >= MIN_PASSWORD_CHARS
}

/// Users worker bound to one connection.
pub struct UsersWorker {
    db: Database,
    state: Arc<WsState>,
}

impl UsersWorker {
    #[must_use]
    pub fn new(db: Database, state: Arc<WsState>) -> Self {
        Self { db, state }
    }

    pub async fn handle_message(
        &self,
        conn: &mut WsConnection,
        action: &str,
        data: &Map<String, Value>,
    ) -> Result<(), Closed> {
        match action {
            "new" => self.new_user(conn, data).await,
            "login" => self.login(conn, data).await,
            _ => conn.send_error(ERR_INVALID_ACTION).await,
        }
    }

    /// Register an account and kick off email verification.
    async fn new_user(
        &self,
        conn: &mut WsConnection,
        data: &Map<String, Value>,
    ) -> Result<(), Closed> {
        let input: NewUserInput = match serde_json::from_value(Value::Object(data.clone())) {
            Ok(input) => input,
            Err(_) => return conn.send_error(ERR_INVALID_DATA).await,
        };
        if !valid_email(&input.email)
            || !valid_username(&input.username)
            || !valid_password(&input.password)
        {
            return conn.send_error(ERR_INVALID_DATA).await;
        }

        let user = match self
            .db
            .users()
            .create(&input.email, &input.username, &input.password)
            .await
        {
            Ok(user) => user,
            Err(StoreError::AlreadyExists(_)) => {
                return conn.send_error(ERR_USER_EXISTS).await;
            }
            Err(err) => {
                error!("Failed to create user: {err}");
                return conn.send_error(ERR_INTERNAL).await;
            }
        };

        // The account exists either way; a failed code or mail only delays
        // verification and is logged, not surfaced.
        match self.db.codes().issue(user.id, self.state.security()).await {
            Ok(code) => {
                if let Err(err) = self
                    .state
                    .mailer()
                    .send_verification_code(&user.email, &code.code)
                {
                    error!("Failed to send verification email: {err}");
                }
            }
            Err(err) => error!("Failed to issue verification code: {err}"),
        }

        conn.send_json(&json!({ "action": "new", "data": user }))
            .await
    }

    /// Exchange email + password for a fresh session token.
    async fn login(
        &self,
        conn: &mut WsConnection,
        data: &Map<String, Value>,
    ) -> Result<(), Closed> {
        let input: LoginInput = match serde_json::from_value(Value::Object(data.clone())) {
            Ok(input) => input,
            Err(_) => return conn.send_error(ERR_INVALID_DATA).await,
        };
        if !valid_email(&input.email) {
            return conn.send_error(ERR_INVALID_DATA).await;
        }

        match self
            .db
            .tokens()
            .session_new(&input.email, &input.password)
            .await
        {
            Ok(token) => {
                conn.send_json(&json!({
                    "action": "login",
                    "data": { "token": token.id },
                }))
                .await
            }
            Err(StoreError::NotFound { .. }) => conn.send_error(ERR_USER_MISSING).await,
            Err(StoreError::PasswordIncorrect(_)) => {
                conn.send_error(ERR_PASSWORD_INCORRECT).await
            }
            Err(err) => {
                error!("Failed to log user in: {err}");
                conn.send_error(ERR_INTERNAL).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation_accepts_plain_addresses() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn username_must_not_be_blank() {
        assert!(valid_username("alice"));
        assert!(!valid_username(""));
        assert!(!valid_username("   "));
    }

    #[test]
    fn password_length_is_enforced_in_characters() {
        assert!(valid_password(&SecretString::from("longenough")));
        assert!(!valid_password(&SecretString::from("short")));
        // Multibyte characters count as one.
        assert!(valid_password(&SecretString::from("pässwörd")));
    }

    #[test]
    fn new_user_input_requires_all_fields() {
        let complete: Result<NewUserInput, _> = serde_json::from_value(json!({
            "email": "a@example.com",
            "username": "alice",
            "password": "hunter2hunter2",
        }));
        assert!(complete.is_ok());

        let missing: Result<NewUserInput, _> = serde_json::from_value(json!({
            "email": "a@example.com",
        }));
        assert!(missing.is_err());
    }
}
