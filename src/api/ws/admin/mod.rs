//! Admin target worker: the challenge/response state machine plus the
//! account-administration actions gated behind it.
//!
//! Flow Overview:
//! 1) `auth` issues an RSA-encrypted 32-byte challenge as a raw binary frame
//!    and waits (bounded) for the MD5 digest of the plaintext.
//! 2) Failures feed the per-connection waitlist; once the attempt budget is
//!    spent the backoff escalates from `fail_timeout` to `fail_lock_time`.
//! 3) Data actions (`get_user`, `get_users`, `delete_user`) require a live
//!    `Authenticated` state and translate store errors into protocol
//!    replies.

pub mod challenge;
pub mod registry;

pub use registry::{AdminAuthState, AdminRegistry, AuthConfig};

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::error;
use uuid::Uuid;

use crate::db::{Database, StoreError};

use super::envelope::ERR_INVALID_DATA;
use super::{BinaryReply, Closed, WsConnection, WsState};

/// Routing key this worker is registered under.
pub const TARGET: &str = "admin";

const ERR_INVALID_ACTION: &str = "Invalid action.";
const ERR_NOT_AUTHENTICATED: &str = "Not authenticated.";
const ERR_USER_MISSING: &str = "User does not exist.";
const ERR_MUST_WAIT: &str = "You must wait before trying again.";
const ERR_INTERNAL: &str = "Internal error.";

#[derive(Debug, Deserialize)]
struct GetUsersInput {
    page: i64,
    page_size: i64,
}

#[derive(Debug, Deserialize)]
struct UserIdInput {
    id: Uuid,
}

/// Admin worker bound to one connection.
pub struct AdminWorker {
    conn_id: Uuid,
    db: Database,
    state: Arc<WsState>,
}

impl AdminWorker {
    #[must_use]
    pub fn new(conn_id: Uuid, db: Database, state: Arc<WsState>) -> Self {
        Self {
            conn_id,
            db,
            state,
        }
    }

    pub async fn handle_message(
        &self,
        conn: &mut WsConnection,
        action: &str,
        data: &Map<String, Value>,
    ) -> Result<(), Closed> {
        match action {
            "auth" => self.auth(conn).await,
            "logoff" => self.logoff(conn).await,
            "get_users" => self.get_users(conn, data).await,
            "get_user" => self.get_user(conn, data).await,
            "delete_user" => self.delete_user(conn, data).await,
            _ => conn.send_error(ERR_INVALID_ACTION).await,
        }
    }

    /// The challenge/response transition out of `Unauthenticated`.
    async fn auth(&self, conn: &mut WsConnection) -> Result<(), Closed> {
        let registry = self.state.registry();
        let now = Utc::now();

        if registry.retry_blocked(self.conn_id, now).await {
            return conn.send_error(ERR_MUST_WAIT).await;
        }

        let challenge = challenge::generate();
        let ciphertext = match challenge::encrypt(self.state.owner_key(), &challenge) {
            Ok(ciphertext) => ciphertext,
            Err(err) => {
                error!("Failed to encrypt admin challenge: {err}");
                return conn.send_error(ERR_INTERNAL).await;
            }
        };

        registry.set_challenge(self.conn_id, challenge).await;
        conn.send_bytes(ciphertext).await?;

        let wait = self.state.auth().challenge_timeout();
        let response = match timeout(wait, conn.recv_binary()).await {
            // Bounded wait expired: abort silently, no failure recorded.
            Err(_) => {
                registry.clear_challenge(self.conn_id).await;
                return Ok(());
            }
            // Disconnected mid-flow: abort silently, the close path cleans up.
            Ok(Err(Closed)) => return Err(Closed),
            Ok(Ok(BinaryReply::UnexpectedText)) => {
                registry.clear_challenge(self.conn_id).await;
                return conn.send_error(ERR_INVALID_DATA).await;
            }
            Ok(Ok(BinaryReply::Bytes(bytes))) => bytes,
        };

        let now = Utc::now();
        if challenge::verify(&challenge, &response) {
            let expires_at = now + self.state.auth().admin_auth_timeout();
            registry.set_authenticated(self.conn_id, expires_at).await;
            conn.send_json(&json!({ "message": "Authenticated." })).await
        } else {
            registry
                .record_failure(self.conn_id, now, self.state.auth())
                .await;
            conn.send_json(&json!({
                "target": "admin",
                "data": { "message": "Authentication failed." },
            }))
            .await
        }
    }

    async fn logoff(&self, conn: &mut WsConnection) -> Result<(), Closed> {
        if self.state.registry().logoff(self.conn_id, Utc::now()).await {
            conn.send_json(&json!({
                "action": "logoff",
                "data": { "success": true },
            }))
            .await
        } else {
            conn.send_error(ERR_NOT_AUTHENTICATED).await
        }
    }

    /// Gate for the data actions. Replies on failure and reports whether the
    /// caller may proceed.
    async fn require_authenticated(&self, conn: &mut WsConnection) -> Result<bool, Closed> {
        if self
            .state
            .registry()
            .is_authenticated(self.conn_id, Utc::now())
            .await
        {
            Ok(true)
        } else {
            conn.send_error(ERR_NOT_AUTHENTICATED).await?;
            Ok(false)
        }
    }

    async fn get_users(
        &self,
        conn: &mut WsConnection,
        data: &Map<String, Value>,
    ) -> Result<(), Closed> {
        if !self.require_authenticated(conn).await? {
            return Ok(());
        }

        let input: GetUsersInput = match serde_json::from_value(Value::Object(data.clone())) {
            Ok(input) => input,
            Err(_) => return conn.send_error(ERR_INVALID_DATA).await,
        };
        if input.page < 0 || input.page_size < 1 {
            return conn.send_error(ERR_INVALID_DATA).await;
        }

        match self.db.users().page(input.page, input.page_size).await {
            Ok(users) => {
                conn.send_json(&json!({ "action": "users", "data": users }))
                    .await
            }
            Err(err) => {
                error!("Failed to fetch user page: {err}");
                conn.send_error(ERR_INTERNAL).await
            }
        }
    }

    async fn get_user(
        &self,
        conn: &mut WsConnection,
        data: &Map<String, Value>,
    ) -> Result<(), Closed> {
        if !self.require_authenticated(conn).await? {
            return Ok(());
        }

        let input: UserIdInput = match serde_json::from_value(Value::Object(data.clone())) {
            Ok(input) => input,
            Err(_) => return conn.send_error(ERR_INVALID_DATA).await,
        };

        match self.db.users().get(input.id).await {
            Ok(user) => {
                conn.send_json(&json!({ "action": "get_user", "data": user }))
                    .await
            }
            Err(StoreError::NotFound { .. }) => conn.send_error(ERR_USER_MISSING).await,
            Err(err) => {
                error!("Failed to fetch user: {err}");
                conn.send_error(ERR_INTERNAL).await
            }
        }
    }

    async fn delete_user(
        &self,
        conn: &mut WsConnection,
        data: &Map<String, Value>,
    ) -> Result<(), Closed> {
        if !self.require_authenticated(conn).await? {
            return Ok(());
        }

        let input: UserIdInput = match serde_json::from_value(Value::Object(data.clone())) {
            Ok(input) => input,
            Err(_) => return conn.send_error(ERR_INVALID_DATA).await,
        };

        match self.db.users().delete(input.id).await {
            Ok(()) => {
                conn.send_json(&json!({
                    "action": "delete_user",
                    "data": { "success": true },
                }))
                .await
            }
            Err(StoreError::NotFound { .. }) => conn.send_error(ERR_USER_MISSING).await,
            Err(err) => {
                error!("Failed to delete user: {err}");
                conn.send_error(ERR_INTERNAL).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_users_input_validates_shape() {
        let data = json!({"page": 0, "page_size": 10});
        let input: Result<GetUsersInput, _> = serde_json::from_value(data);
        assert!(input.is_ok_and(|input| input.page == 0 && input.page_size == 10));

        let missing: Result<GetUsersInput, _> = serde_json::from_value(json!({"page": 0}));
        assert!(missing.is_err());

        let wrong_type: Result<GetUsersInput, _> =
            serde_json::from_value(json!({"page": "0", "page_size": 10}));
        assert!(wrong_type.is_err());
    }

    #[test]
    fn user_id_input_requires_a_well_formed_uuid() {
        let valid: Result<UserIdInput, _> =
            serde_json::from_value(json!({"id": "6f2b48e0-96a5-4f34-8c0f-04d236be8a5a"}));
        assert!(valid.is_ok());

        let malformed: Result<UserIdInput, _> = serde_json::from_value(json!({"id": "not-a-uuid"}));
        assert!(malformed.is_err());

        let missing: Result<UserIdInput, _> = serde_json::from_value(json!({}));
        assert!(missing.is_err());
    }
}
