//! Per-connection dispatch of validated messages to target workers.

use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Database;

use super::admin::AdminWorker;
use super::users::UsersWorker;
use super::{admin, users, Closed, WsConnection, WsState};

const ERR_TARGET_NOT_FOUND: &str = "Target not found.";

/// Fixed target → worker mapping, constructed once per connection. Each
/// worker is bound to the connection identity and the shared state for the
/// socket's lifetime.
pub struct MessageRouter {
    admin: AdminWorker,
    users: UsersWorker,
}

impl MessageRouter {
    #[must_use]
    pub fn new(conn_id: Uuid, db: Database, state: Arc<WsState>) -> Self {
        Self {
            admin: AdminWorker::new(conn_id, db.clone(), state.clone()),
            users: UsersWorker::new(db, state),
        }
    }

    /// Forward an inner envelope to its target worker and await completion;
    /// the caller resumes receiving only after the reply is out.
    pub async fn direct_message(
        &self,
        conn: &mut WsConnection,
        target: &str,
        action: &str,
        data: &Map<String, Value>,
    ) -> Result<(), Closed> {
        match target {
            admin::TARGET => self.admin.handle_message(conn, action, data).await,
            users::TARGET => self.users.handle_message(conn, action, data).await,
            _ => conn.send_error(ERR_TARGET_NOT_FOUND).await,
        }
    }
}
