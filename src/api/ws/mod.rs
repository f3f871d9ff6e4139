//! The multiplexed WebSocket endpoint.
//!
//! One upgrade handler, one task per accepted socket. Each connection runs a
//! strictly sequential receive/dispatch/reply loop: a message is fully
//! handled (including nested awaits on the store or on the admin challenge
//! exchange) before the next frame is read. Different connections proceed
//! independently; the only state they share is [`WsState`].

pub mod admin;
pub mod envelope;
pub mod router;
pub mod users;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Extension;
use axum::response::IntoResponse;
use rsa::RsaPublicKey;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::db::codes::SecurityConfig;
use crate::db::Database;
use crate::mail::Mailer;

use admin::{AdminRegistry, AuthConfig};
use router::MessageRouter;

/// State shared by every connection on the endpoint.
pub struct WsState {
    auth: AuthConfig,
    security: SecurityConfig,
    owner_key: RsaPublicKey,
    mailer: Mailer,
    registry: AdminRegistry,
}

impl WsState {
    #[must_use]
    pub fn new(
        auth: AuthConfig,
        security: SecurityConfig,
        owner_key: RsaPublicKey,
        mailer: Mailer,
    ) -> Self {
        Self {
            auth,
            security,
            owner_key,
            mailer,
            registry: AdminRegistry::new(),
        }
    }

    #[must_use]
    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    #[must_use]
    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    #[must_use]
    pub fn owner_key(&self) -> &RsaPublicKey {
        &self.owner_key
    }

    #[must_use]
    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    #[must_use]
    pub fn registry(&self) -> &AdminRegistry {
        &self.registry
    }
}

/// The peer is gone; the connection loop must unwind without reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

/// Application-level frames the loop cares about.
enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Outcome of waiting for the client's binary challenge response.
pub enum BinaryReply {
    Bytes(Vec<u8>),
    /// The client sent a text frame where bytes were expected.
    UnexpectedText,
}

/// One accepted socket plus the identity used to key shared auth state.
pub struct WsConnection {
    id: Uuid,
    socket: WebSocket,
}

impl WsConnection {
    fn new(socket: WebSocket) -> Self {
        Self {
            id: Uuid::new_v4(),
            socket,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn send_json<T: Serialize>(&mut self, payload: &T) -> Result<(), Closed> {
        let text = serde_json::to_string(payload).map_err(|_| Closed)?;
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|_| Closed)
    }

    pub async fn send_error(&mut self, message: &str) -> Result<(), Closed> {
        self.send_json(&json!({ "error": message })).await
    }

    pub async fn send_bytes(&mut self, payload: Vec<u8>) -> Result<(), Closed> {
        self.socket
            .send(Message::Binary(payload))
            .await
            .map_err(|_| Closed)
    }

    /// Next text or binary frame; `None` once the transport is gone.
    /// Protocol ping/pong frames are answered by the transport layer and
    /// skipped here.
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.socket.recv().await? {
                Ok(Message::Text(text)) => return Some(Frame::Text(text)),
                Ok(Message::Binary(bytes)) => return Some(Frame::Binary(bytes)),
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Ok(Message::Close(_)) | Err(_) => return None,
            }
        }
    }

    /// Await the client's binary reply during the challenge exchange.
    pub async fn recv_binary(&mut self) -> Result<BinaryReply, Closed> {
        match self.next_frame().await {
            Some(Frame::Binary(bytes)) => Ok(BinaryReply::Bytes(bytes)),
            Some(Frame::Text(_)) => Ok(BinaryReply::UnexpectedText),
            None => Err(Closed),
        }
    }
}

/// Upgrade handler for the WebSocket route.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(db): Extension<Database>,
    Extension(state): Extension<Arc<WsState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, db, state))
}

async fn handle_socket(socket: WebSocket, db: Database, state: Arc<WsState>) {
    let mut conn = WsConnection::new(socket);
    let conn_id = conn.id();
    debug!(connection = %conn_id, "websocket connected");

    let router = MessageRouter::new(conn_id, db, state.clone());
    let _ = serve(&mut conn, &router).await;

    // The socket is gone; auth state keyed by this identity goes with it.
    state.registry().remove(conn_id).await;
    debug!(connection = %conn_id, "websocket closed");
}

/// The per-connection receive loop. Returns `Ok(())` on a clean disconnect
/// and `Err(Closed)` when the peer vanished mid-reply; both are terminal.
async fn serve(conn: &mut WsConnection, router: &MessageRouter) -> Result<(), Closed> {
    loop {
        let frame = match conn.next_frame().await {
            Some(frame) => frame,
            None => return Ok(()),
        };

        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(_) => {
                // Binary frames only make sense inside the auth exchange.
                conn.send_error(envelope::ERR_INVALID_DATA).await?;
                continue;
            }
        };

        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => {
                conn.send_error(envelope::ERR_INVALID_DATA).await?;
                continue;
            }
        };

        match envelope::parse(&value) {
            Err(message) => conn.send_error(message).await?,
            Ok(envelope::Inbound::Ping) => {
                conn.send_json(&json!({ "target": "pong" })).await?;
            }
            Ok(envelope::Inbound::Dispatch {
                target,
                action,
                data,
            }) => {
                router.direct_message(conn, &target, &action, &data).await?;
            }
        }
    }
}
