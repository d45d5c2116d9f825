use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::IntoResponse;
use sha3::{Digest, Sha3_256};
use std::sync::Arc;

pub fn api_key_digest(api_key: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(api_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lets the request through when the sha3-256 digest of `x-api-key` matches `expected_digest`.
pub async fn auth(
    State(expected_digest): State<Arc<str>>,
    request: Request,
    next: Next,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let api_key = request
        .headers()
        .get("x-api-key")
        .map(|value| value.to_str().unwrap_or_default())
        .ok_or_else(|| {
            tracing::debug!("Unauthorized call to publishing api");
            (StatusCode::UNAUTHORIZED, "Unauthorized".into())
        })?;

    if api_key_digest(api_key) != *expected_digest {
        tracing::warn!("Unauthorized call to publishing api (invalid key)");
        return Err((StatusCode::UNAUTHORIZED, "Unauthorized".into()));
    }
    Ok(next.run(request).await)
}
