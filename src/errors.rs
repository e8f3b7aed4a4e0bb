use crate::services::error::{ConstraintKind, StorageError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Error returned by handlers: an HTTP status plus a client-safe message.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));
        (self.status, body).into_response()
    }
}

/// Server-side faults are logged here and leave with a generic message.
impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::Validation(_) | StorageError::BackendMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            StorageError::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            StorageError::EntityNotFound(_)
            | StorageError::ObjectMissing(_)
            | StorageError::ConstraintViolation {
                kind: ConstraintKind::ForeignKey,
                ..
            } => StatusCode::NOT_FOUND,
            StorageError::ConstraintViolation { message, .. } => {
                tracing::warn!(error = %message, "constraint violation");
                StatusCode::CONFLICT
            }
            StorageError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            other => {
                tracing::error!(error = %other, "storage failure");
                return AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "Error streaming file");
            }
        };

        let message = match err {
            StorageError::Validation(msg) => msg,
            StorageError::BackendMismatch { .. } => "File storage medium mismatch".into(),
            StorageError::SizeLimitExceeded { .. } => "File size is too large".into(),
            StorageError::EntityNotFound(id) => format!("File '{}' does not exist", id),
            StorageError::ObjectMissing(_) => "File content does not exist".into(),
            StorageError::ConstraintViolation {
                kind: ConstraintKind::ForeignKey,
                ..
            } => "Referenced entity does not exist".into(),
            StorageError::ConstraintViolation { .. } => "File already exists".into(),
            StorageError::BackendUnavailable(kind) => {
                format!("Storage medium '{}' is not available", kind)
            }
            other => other.to_string(),
        };
        AppError::new(status, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::file::StorageBackendKind;
    use uuid::Uuid;

    fn status_of(err: StorageError) -> StatusCode {
        AppError::from(err).status
    }

    #[test]
    fn taxonomy_maps_to_status_classes() {
        assert_eq!(
            status_of(StorageError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StorageError::SizeLimitExceeded { limit: 1 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_of(StorageError::EntityNotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(StorageError::BackendMismatch {
                stored: StorageBackendKind::Disk,
                requested: StorageBackendKind::ObjectStore,
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StorageError::ConstraintViolation {
                kind: ConstraintKind::ForeignKey,
                message: "fk".into(),
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(StorageError::ConstraintViolation {
                kind: ConstraintKind::Unique,
                message: "dup".into(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(StorageError::ObjectMissing("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(StorageError::BackendUnavailable(StorageBackendKind::ObjectStore)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn conflicts_hide_database_text() {
        let err = AppError::from(StorageError::ConstraintViolation {
            kind: ConstraintKind::Unique,
            message: "UNIQUE constraint failed: files.storage_backend, files.path".into(),
        });
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.message, "File already exists");
    }

    #[test]
    fn server_faults_hide_details() {
        let err = AppError::from(StorageError::streaming("connection reset by peer"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Error streaming file");
    }
}
