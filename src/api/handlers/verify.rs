//! Email verification endpoint.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use tracing::error;

use crate::db::{Database, StoreError};

/// Resolve a verification code and mark its user verified.
///
/// 404 when the code does not resolve; 403 when it resolved but expired, in
/// which case the code is deleted as a side effect. A consumed code is
/// deleted too: codes are single-use.
pub async fn verify_user(
    Path(code): Path<String>,
    Extension(db): Extension<Database>,
) -> Response {
    let code = match db.codes().get(&code).await {
        Ok(code) => code,
        Err(StoreError::NotFound { .. }) => {
            return (StatusCode::NOT_FOUND, "Code not found").into_response();
        }
        Err(err) => {
            error!("Failed to resolve verification code: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if code.expires < Utc::now() {
        if let Err(err) = db.codes().delete(code.id).await {
            error!("Failed to delete expired verification code: {err}");
        }
        return (StatusCode::FORBIDDEN, "Validation code expired").into_response();
    }

    if let Err(err) = db.users().mark_verified(code.user_id).await {
        // The user may have been deleted while the code was live.
        if matches!(err, StoreError::NotFound { .. }) {
            return (StatusCode::NOT_FOUND, "Code not found").into_response();
        }
        error!("Failed to mark user verified: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Err(err) = db.codes().delete(code.id).await {
        error!("Failed to delete consumed verification code: {err}");
    }

    match db.users().get(code.user_id).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => {
            error!("Failed to fetch verified user: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
