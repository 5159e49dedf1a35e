//! File endpoint handlers: upload, list, download, soft-delete, restore,
//! plus the shuffle and cleanup batch triggers.

use axum::body::Body;
use axum::extract::Multipart;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use garde::Validate;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::errors::GatewayError;
use crate::identity::Caller;
use crate::lifecycle::UploadRequest;
use crate::metadata::store::FileId;
use crate::AppState;

/// Parsed `POST /files/upload` form.
#[derive(Debug, Default, Validate)]
struct UploadForm {
    #[garde(length(min = 1, max = 255))]
    filename: String,
    #[garde(skip)]
    data: Bytes,
    #[garde(length(max = 128))]
    access_list: Option<String>,
    #[garde(length(max = 128))]
    delete_on_access_by: Option<String>,
}

fn malformed(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::validation(format!("malformed multipart body: {e}"))
}

/// Drain the multipart body.  Fails when no `file` field is present.
async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, GatewayError> {
    let mut form = UploadForm::default();
    let mut saw_file = false;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                form.filename = field.file_name().unwrap_or_default().to_string();
                form.data = field.bytes().await.map_err(malformed)?;
                saw_file = true;
            }
            "accessList" => form.access_list = Some(field.text().await.map_err(malformed)?),
            "deleteOnAccessBy" => {
                form.delete_on_access_by = Some(field.text().await.map_err(malformed)?)
            }
            other => debug!("ignoring multipart field `{other}`"),
        }
    }

    if !saw_file {
        return Err(GatewayError::validation("No file uploaded"));
    }
    form.validate()
        .map_err(|report| GatewayError::validation(report.to_string()))?;
    Ok(form)
}

/// `POST /files/upload`
pub async fn upload_file(
    state: Arc<AppState>,
    caller: Caller,
    multipart: Multipart,
) -> Result<Response, GatewayError> {
    let form = read_upload_form(multipart).await?;
    let record = state
        .files
        .upload(
            &caller,
            UploadRequest {
                filename: form.filename,
                data: form.data,
                access_list: form.access_list,
                delete_on_access_by: form.delete_on_access_by,
            },
        )
        .await?;

    Ok(Json(json!({
        "message": format!("Uploaded to {}", record.provider),
        "id": record.id,
        "key": record.storage_key,
        "provider": record.provider,
    }))
    .into_response())
}

/// `GET /files`
pub async fn list_files(state: Arc<AppState>, caller: Caller) -> Result<Response, GatewayError> {
    let records = state.files.list(&caller).await?;
    Ok(Json(records).into_response())
}

/// `GET /files/:id` -- streams the object.  Headers go out before the
/// first body chunk, so a provider failure mid-stream aborts the response.
pub async fn download_file(
    state: Arc<AppState>,
    caller: Caller,
    id: FileId,
) -> Result<Response, GatewayError> {
    let download = state.files.download(&caller, id).await?;
    let disposition = HeaderValue::from_str(&download.content_disposition())
        .map_err(|e| GatewayError::Internal(e.into()))?;

    let mut response = Body::from_stream(download.body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

/// `DELETE /files/:id`
pub async fn delete_file(
    state: Arc<AppState>,
    caller: Caller,
    id: FileId,
) -> Result<Response, GatewayError> {
    state.files.soft_delete(&caller, id).await?;
    Ok(Json(json!({ "message": "File deleted" })).into_response())
}

/// `POST /files/:id/restore`
pub async fn restore_file(state: Arc<AppState>, id: FileId) -> Result<Response, GatewayError> {
    state.files.restore(id).await?;
    Ok(Json(json!({ "message": "File restored" })).into_response())
}

/// `POST /files/shuffle`
pub async fn shuffle_files(state: Arc<AppState>) -> Result<Response, GatewayError> {
    let report = state.migrations.migrate_all().await?;
    let message = if report.total() == 0 {
        "No files to shuffle"
    } else if report.is_clean() {
        "Files shuffled between providers successfully"
    } else {
        "Shuffle finished with failures"
    };
    Ok((
        StatusCode::OK,
        Json(json!({ "message": message, "report": report })),
    )
        .into_response())
}

/// `POST /files/cleanup`
pub async fn cleanup_files(state: Arc<AppState>) -> Result<Response, GatewayError> {
    let report = state.files.cleanup().await?;
    Ok(Json(report).into_response())
}
