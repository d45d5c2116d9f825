use crate::auth::auth;
use crate::blend::StyleBlender;
use crate::canvas::encode_png;
use crate::dao::GiftStore;
use crate::model::{
    GiftLink, GiftRecord, GiftSpecification, PosterDownload, PosterSpecification,
    QrSpecification, ShareSheet, StylizeSpecification,
};
use crate::pipeline::SharePipeline;
use crate::poster::poster_filename;
use crate::utils::{etag, gift_error, with_timeout};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const DEFAULT_TIMEOUT: u64 = 3_000;
const RENDER_TIMEOUT: u64 = 90_000;
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const X_STYLIZED: HeaderName = HeaderName::from_static("x-stylized");

type Pipeline<S, B> = State<Arc<SharePipeline<S, B>>>;

pub fn create_router<S: GiftStore, B: StyleBlender>(
    pipeline: Arc<SharePipeline<S, B>>,
    api_key_digest: Arc<str>,
) -> Router {
    Router::new()
        .route(
            "/gifts",
            post(create_gift::<S, B>).route_layer(from_fn_with_state(api_key_digest, auth)),
        )
        .route("/gifts/:id", get(get_gift::<S, B>))
        .route("/gifts/:id/share", get(share_gift::<S, B>))
        .route("/gifts/:id/qr", post(gift_qr::<S, B>))
        .route("/gifts/:id/poster", post(gift_poster::<S, B>))
        .route("/gifts/:id/stylize", post(stylize_gift::<S, B>))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

pub async fn create_gift<S: GiftStore, B: StyleBlender>(
    State(pipeline): Pipeline<S, B>,
    Json(gift): Json<GiftSpecification>,
) -> Result<(StatusCode, Json<GiftLink>), (StatusCode, String)> {
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let link = with_timeout(DEFAULT_TIMEOUT, pipeline.publish(&gift, &cancel))
        .await?
        .map_err(gift_error)?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn get_gift<S: GiftStore, B: StyleBlender>(
    State(pipeline): Pipeline<S, B>,
    Path(gift_id): Path<String>,
) -> Result<Json<GiftRecord>, (StatusCode, String)> {
    Ok(Json(find_gift(&pipeline, &gift_id).await?))
}

pub async fn share_gift<S: GiftStore, B: StyleBlender>(
    State(pipeline): Pipeline<S, B>,
    Path(gift_id): Path<String>,
) -> Result<Json<ShareSheet>, (StatusCode, String)> {
    let gift = find_gift(&pipeline, &gift_id).await?;
    Ok(Json(pipeline.share_sheet(&gift)))
}

pub async fn gift_qr<S: GiftStore, B: StyleBlender>(
    State(pipeline): Pipeline<S, B>,
    Path(gift_id): Path<String>,
    headers: HeaderMap,
    Json(spec): Json<QrSpecification>,
) -> Result<Response, (StatusCode, String)> {
    let gift = find_gift(&pipeline, &gift_id).await?;
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let artifact = with_timeout(RENDER_TIMEOUT, pipeline.qr(&gift, &spec, &cancel))
        .await?
        .map_err(gift_error)?;
    let png = encode_png(&artifact.raster).map_err(gift_error)?;
    Ok(png_response(png, &headers, Vec::new()))
}

pub async fn gift_poster<S: GiftStore, B: StyleBlender>(
    State(pipeline): Pipeline<S, B>,
    Path(gift_id): Path<String>,
    headers: HeaderMap,
    Json(spec): Json<PosterSpecification>,
) -> Result<Response, (StatusCode, String)> {
    let gift = find_gift(&pipeline, &gift_id).await?;
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let poster = with_timeout(RENDER_TIMEOUT, pipeline.poster(&gift, &spec, &cancel))
        .await?
        .map_err(gift_error)?;
    let filename = poster_filename(&gift.title);

    if accepts_json(&headers) {
        return Ok(Json(PosterDownload {
            data_url: poster.data_url(),
            filename,
            width: poster.width,
            height: poster.height,
        })
        .into_response());
    }
    let disposition = (
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{filename}\""),
    );
    Ok(png_response(poster.png, &headers, vec![disposition]))
}

pub async fn stylize_gift<S: GiftStore, B: StyleBlender>(
    State(pipeline): Pipeline<S, B>,
    Path(gift_id): Path<String>,
    headers: HeaderMap,
    Json(spec): Json<StylizeSpecification>,
) -> Result<Response, (StatusCode, String)> {
    let gift = find_gift(&pipeline, &gift_id).await?;
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let stylized = with_timeout(RENDER_TIMEOUT, pipeline.stylize(&gift, &spec, &cancel))
        .await?
        .map_err(gift_error)?;
    let png = encode_png(&stylized.image).map_err(gift_error)?;
    Ok(png_response(
        png,
        &headers,
        vec![(X_STYLIZED, stylized.stylized.to_string())],
    ))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn find_gift<S: GiftStore, B: StyleBlender>(
    pipeline: &SharePipeline<S, B>,
    gift_id: &str,
) -> Result<GiftRecord, (StatusCode, String)> {
    with_timeout(DEFAULT_TIMEOUT, pipeline.published(gift_id))
        .await?
        .map_err(gift_error)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Not found".into()))
}

fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"))
}

/// PNG body tagged with its content hash; answers 304 when the client already has it.
fn png_response(
    png: Vec<u8>,
    request_headers: &HeaderMap,
    extra_headers: Vec<(HeaderName, String)>,
) -> Response {
    let tag = etag(&png);
    let cached = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.split(',').any(|candidate| candidate.trim() == tag));
    let mut response = if cached {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        ([(header::CONTENT_TYPE, "image/png")], png).into_response()
    };
    let headers = response.headers_mut();
    for (name, value) in extra_headers {
        match HeaderValue::try_from(value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(err) => tracing::debug!("Skipping response header {}: {}", name, err),
        }
    }
    if let Ok(tag) = HeaderValue::try_from(tag) {
        headers.insert(header::ETAG, tag);
    }
    response
}
