//! Typed failures surfaced by the stores.

use thiserror::Error;

/// Store-level errors. Handlers match on these and translate them to the
/// documented JSON error shapes; only `Database`/`Hash` are unexpected.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} with id {id} does not exist")]
    NotFound { entity: &'static str, id: String },

    #[error("user already exists: {0}")]
    AlreadyExists(String),

    #[error("incorrect password for {0}")]
    PasswordIncorrect(String),

    #[error("password hashing failed")]
    Hash,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StoreError;

    #[test]
    fn not_found_renders_entity_and_id() {
        let err = StoreError::not_found("user", "42");
        assert_eq!(err.to_string(), "user with id 42 does not exist");
    }

    #[test]
    fn password_incorrect_names_the_account() {
        let err = StoreError::PasswordIncorrect("a@example.com".to_string());
        assert_eq!(err.to_string(), "incorrect password for a@example.com");
    }
}
