//! The blob HTTP surface: authenticated upload and delete, public
//! retrieval, per-uploader listing.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::json;
use tracing::debug;

use nectar_blobstore::BlobError;
use nectar_primitives::Pubkey;

use crate::auth::{verify_envelope, AuthError};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload", put(upload))
        .route("/list/:pubkey", get(list))
        .route("/:hash", get(fetch).delete(remove))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let uploader = match authenticate(&state, &headers, "PUT", "/blossom/upload", &body) {
        Ok(pubkey) => pubkey,
        Err(err) => return err,
    };

    match state.engine.blobs().put(
        &body,
        uploader,
        &state.engine.limits().allowed_mime,
        nectar_primitives::unix_now(),
    ) {
        Ok(descriptor) => {
            debug!(hash = %descriptor.sha256, uploader = %uploader, "blob uploaded");
            (StatusCode::OK, Json(descriptor)).into_response()
        }
        Err(err) => blob_error(&err),
    }
}

async fn fetch(State(state): State<Arc<AppState>>, Path(hash): Path<String>) -> Response {
    let Some(hash) = parse_hash(&hash) else {
        return message(StatusCode::BAD_REQUEST, "invalid: malformed hash");
    };

    let descriptor = match state.engine.blobs().descriptor(&hash) {
        Ok(descriptor) => descriptor,
        Err(err) => return blob_error(&err),
    };

    match state.engine.blobs().get(&hash) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, descriptor.mime)],
            bytes,
        )
            .into_response(),
        Err(err) => blob_error(&err),
    }
}

async fn list(State(state): State<Arc<AppState>>, Path(pubkey): Path<String>) -> Response {
    let Ok(pubkey) = pubkey.parse::<Pubkey>() else {
        return message(StatusCode::BAD_REQUEST, "invalid: malformed pubkey");
    };

    match state.engine.blobs().list(&pubkey) {
        Ok(descriptors) => (StatusCode::OK, Json(descriptors)).into_response(),
        Err(err) => blob_error(&err),
    }
}

async fn remove(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(parsed) = parse_hash(&hash) else {
        return message(StatusCode::BAD_REQUEST, "invalid: malformed hash");
    };

    let requester = match authenticate(&state, &headers, "DELETE", &format!("/blossom/{hash}"), &[])
    {
        Ok(pubkey) => pubkey,
        Err(err) => return err,
    };

    match state.engine.blobs().delete(&parsed, &requester) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => blob_error(&err),
    }
}

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<Pubkey, Response> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    verify_envelope(
        header,
        method,
        path,
        body,
        nectar_primitives::unix_now(),
        state.engine.limits().auth_window_secs,
    )
    .map_err(|err| auth_error(&err))
}

fn auth_error(err: &AuthError) -> Response {
    message(StatusCode::UNAUTHORIZED, &err.to_string())
}

fn blob_error(err: &BlobError) -> Response {
    let status = match err {
        BlobError::Empty => StatusCode::BAD_REQUEST,
        BlobError::MimeNotAllowed(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        BlobError::NotFound => StatusCode::NOT_FOUND,
        BlobError::NotUploader => StatusCode::FORBIDDEN,
        BlobError::CorruptMeta(_) | BlobError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let prefix = match err {
        BlobError::Empty => "invalid",
        BlobError::MimeNotAllowed(_) => "restricted",
        BlobError::NotFound => "not-found",
        BlobError::NotUploader => "restricted",
        BlobError::CorruptMeta(_) | BlobError::Store(_) => "error",
    };

    message(status, &format!("{prefix}: {err}"))
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

fn parse_hash(hash: &str) -> Option<[u8; 32]> {
    let mut bytes = [0_u8; 32];
    hex::decode_to_slice(hash, &mut bytes).ok()?;
    Some(bytes)
}
