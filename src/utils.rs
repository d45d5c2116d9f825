use crate::error::GiftError;
use axum::http::StatusCode;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use sha3::{Digest, Sha3_256};
use std::error::Error;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

pub fn internal_error<E>(err: E) -> (StatusCode, String)
where
    E: Error,
{
    tracing::error!("{}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
}

/// Maps a share-flow failure to its status code and user-facing message.
pub fn gift_error(err: GiftError) -> (StatusCode, String) {
    match &err {
        GiftError::Render(_) | GiftError::Store(_) => tracing::error!("{}", err),
        GiftError::AllocationExhausted | GiftError::StylizationFailed(_) => {
            tracing::warn!("{}", err)
        }
        _ => tracing::debug!("{}", err),
    }
    (err.status_code(), err.user_message())
}

pub async fn with_timeout<F: Future>(
    duration_in_mills: u64,
    task: F,
) -> Result<<F as Future>::Output, (StatusCode, String)> {
    timeout(Duration::from_millis(duration_in_mills), task)
        .await
        .map_err(internal_error)
}

/// Decodes base64 image uploads, with or without a `data:...;base64,` prefix.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, GiftError> {
    let payload = match text.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => text,
    };
    BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|_| GiftError::image_validation("the image is not valid base64"))
}

pub fn etag(bytes: &[u8]) -> String {
    format!("\"{:x}\"", Sha3_256::digest(bytes))
}
