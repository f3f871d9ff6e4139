//! Persistence stores over `PostgreSQL`.
//!
//! Each store borrows the shared [`sqlx::PgPool`] and issues independent
//! statements; there are no cross-statement transactions in this layer.
//! Failures surface as [`StoreError`] so callers can translate not-found
//! and conflict cases into protocol replies instead of faults.

use sqlx::PgPool;

pub mod codes;
pub mod error;
pub mod tokens;
pub mod users;

pub use error::StoreError;

/// Handle bundling the stores around one connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn users(&self) -> users::Users {
        users::Users::new(self.pool.clone())
    }

    #[must_use]
    pub fn tokens(&self) -> tokens::Tokens {
        tokens::Tokens::new(self.pool.clone())
    }

    #[must_use]
    pub fn codes(&self) -> codes::Codes {
        codes::Codes::new(self.pool.clone())
    }
}
