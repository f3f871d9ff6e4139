//! Wire-facing data models shared by the WebSocket workers and HTTP routes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Presence line attached to a user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatus {
    #[serde(rename = "type")]
    pub kind: i16,
    pub text: String,
}

impl Default for UserStatus {
    fn default() -> Self {
        Self {
            kind: 0,
            text: String::new(),
        }
    }
}

/// Public projection of a user row.
///
/// This is the only user shape that leaves the process; the discriminator
/// tag and any secured columns stay internal.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub email: String,
    pub username: String,
    pub icon: Option<String>,
    pub bio: Option<String>,
    pub status: UserStatus,
    pub last_online: DateTime<Utc>,
    pub is_online: bool,
    pub is_banned: bool,
    pub is_verified: bool,
}

/// Session token kinds. Stored as a smallint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    User,
    Bot,
}

impl TokenType {
    #[must_use]
    pub fn as_i16(self) -> i16 {
        match self {
            Self::User => 1,
            Self::Bot => 2,
        }
    }
}

impl TryFrom<i16> for TokenType {
    type Error = i16;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::User),
            2 => Ok(Self::Bot),
            other => Err(other),
        }
    }
}

/// Bearer token row. The id is the opaque token value handed to clients.
#[derive(Debug, Clone)]
pub struct Token {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub last_used: DateTime<Utc>,
    pub token_type: TokenType,
}

/// Live email verification code for a user.
#[derive(Debug, Clone)]
pub struct VerificationCode {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub code: String,
    pub expires: DateTime<Utc>,
}
