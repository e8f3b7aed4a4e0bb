//! HTTP handlers for file upload and download.
//! Request and response bodies are streamed; nothing here buffers a file.

use crate::{
    errors::AppError,
    models::file::{EncryptionMode, StorageBackendKind, StoredObject},
    services::{
        error::StorageError,
        file_service::{FileService, UploadRequest},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

const DEFAULT_ENCODING: &str = "7bit";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
}

/// `POST /files/{backend}/{encryption}`: store the first file part of a
/// multipart body and return its generated identifier.
pub async fn upload_file(
    State(service): State<FileService>,
    Path((backend, encryption)): Path<(String, String)>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let backend: StorageBackendKind = backend
        .parse()
        .map_err(|_| AppError::bad_request("'storage medium' is not a valid option"))?;
    let encryption: EncryptionMode = encryption
        .parse()
        .map_err(|_| AppError::bad_request("'encryption' is not a valid option"))?;

    let declared_length = content_length(&headers)?;
    service.precheck(Some(declared_length))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let encoding = field
            .headers()
            .get("content-transfer-encoding")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_ENCODING)
            .to_string();
        let mime_type = field
            .content_type()
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();

        let request = UploadRequest {
            name,
            encoding,
            mime_type,
            backend,
            secured: encryption.is_secured(),
            declared_length: Some(declared_length),
        };
        let object = service
            .upload(request, field.map_err(StorageError::streaming))
            .await?;

        return Ok((StatusCode::OK, Json(UploadResponse { id: object.id })));
    }

    Err(AppError::bad_request("Missing file part"))
}

/// `GET /files/{id}/{backend}`: stream a stored file back, decrypted.
///
/// Headers go out before the first byte. A fault after that point aborts
/// the connection instead of producing an error response.
pub async fn download_file(
    State(service): State<FileService>,
    Path((id, backend)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let id = Uuid::parse_str(&id).map_err(|_| AppError::bad_request("'id' is not a valid uuid"))?;
    let backend: StorageBackendKind = backend
        .parse()
        .map_err(|_| AppError::bad_request("'storage medium' is not a valid option"))?;

    let download = service.download(id, backend).await?;
    let body = download.body.inspect_err(move |err| {
        error!(%id, error = %err, "download stream faulted after headers were sent");
    });

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &download.object);
    Ok(response)
}

fn content_length(headers: &HeaderMap) -> Result<u64, AppError> {
    headers
        .get(header::CONTENT_LENGTH)
        .ok_or_else(|| AppError::bad_request("Missing content length header"))?
        .to_str()
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| AppError::bad_request("Invalid content length header"))
}

fn set_file_headers(headers: &mut HeaderMap, object: &StoredObject) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&object.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME_TYPE)),
    );

    let disposition = format!("attachment; filename=\"{}\"", header_safe(&object.name));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}

/// Make a filename safe to embed in a quoted header parameter.
fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}
