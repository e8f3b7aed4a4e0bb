//! Defines routes for file storage operations.
//!
//! ## Structure
//! - `GET  /healthz`, `GET /readyz`: liveness and readiness
//! - `POST /files/{backend}/{encryption}`: upload (multipart, first file part)
//! - `GET  /files/{id}/{backend}`: download
//!
//! Upload and download share one two-segment route; each handler reads the
//! segments positionally.

use crate::{
    handlers::{
        file_handlers::{download_file, upload_file},
        health_handlers::{healthz, readyz},
    },
    services::file_service::FileService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. The caller attaches the `FileService` state.
///
/// axum's default body limit is disabled: upload size is enforced while
/// streaming, against the configured maximum.
pub fn routes() -> Router<FileService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/files/{first}/{second}",
            post(upload_file).get(download_file),
        )
        .layer(DefaultBodyLimit::disable())
}
