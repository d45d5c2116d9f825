use crate::canvas::{decode_image, encode_png};
use crate::error::{GiftError, GiftResult};
use crate::model::QrArtifact;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const MAX_REFERENCE_PHOTO_BYTES: usize = 10 * 1024 * 1024;
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoKind {
    Jpeg,
    Png,
    Webp,
}

/// Checks a reference photo locally so bad uploads never reach the provider.
pub fn validate_reference_photo(bytes: &[u8]) -> GiftResult<PhotoKind> {
    if bytes.is_empty() {
        return Err(GiftError::image_validation("the photo is empty"));
    }
    if bytes.len() > MAX_REFERENCE_PHOTO_BYTES {
        return Err(GiftError::image_validation(format!(
            "the photo is {:.1} MB, the limit is 10 MB",
            bytes.len() as f64 / (1024.0 * 1024.0)
        )));
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => Ok(PhotoKind::Jpeg),
        Ok(ImageFormat::Png) => Ok(PhotoKind::Png),
        Ok(ImageFormat::WebP) => Ok(PhotoKind::Webp),
        Ok(other) => Err(GiftError::image_validation(format!(
            "{other:?} images are not supported, use JPEG, PNG or WebP"
        ))),
        Err(_) => Err(GiftError::image_validation(
            "unrecognised image type, use JPEG, PNG or WebP",
        )),
    }
}

pub struct BlendRequest<'a> {
    pub base_qr: &'a RgbaImage,
    pub reference_photo: &'a [u8],
    pub payload_url: &'a str,
    pub strength: f32,
    pub guidance_scale: f32,
}

impl BlendRequest<'_> {
    pub fn validate(&self) -> GiftResult<PhotoKind> {
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(GiftError::invalid_payload("strength must be between 0 and 1"));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale <= 0.0 {
            return Err(GiftError::invalid_payload(
                "guidanceScale must be a positive number",
            ));
        }
        validate_reference_photo(self.reference_photo)
    }
}

/// Remote capability that blends a QR raster with a photo into artwork.
///
/// The returned image is not checked for scannability.
pub trait StyleBlender: Send + Sync + 'static {
    fn blend(
        &self,
        request: &BlendRequest<'_>,
    ) -> impl Future<Output = GiftResult<RgbaImage>> + Send;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderRequest<'a> {
    base_qr: String,
    reference_photo: String,
    payload_url: &'a str,
    strength: f32,
    guidance_scale: f32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProviderResponse {
    #[serde(rename_all = "camelCase")]
    Stylized { stylized_image: String },
    Failed { error: String },
}

#[derive(Clone)]
pub struct HttpStyleBlender {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpStyleBlender {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> GiftResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|err| GiftError::StylizationFailed(format!("http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }
}

impl StyleBlender for HttpStyleBlender {
    async fn blend(&self, request: &BlendRequest<'_>) -> GiftResult<RgbaImage> {
        request.validate()?;
        let body = ProviderRequest {
            base_qr: BASE64_STANDARD.encode(encode_png(request.base_qr)?),
            reference_photo: BASE64_STANDARD.encode(request.reference_photo),
            payload_url: request.payload_url,
            strength: request.strength,
            guidance_scale: request.guidance_scale,
        };
        let mut call = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            call = call.bearer_auth(token);
        }
        let response = call
            .send()
            .await
            .map_err(|err| GiftError::StylizationFailed(format!("provider unreachable: {err}")))?;
        let status = response.status();
        let parsed: ProviderResponse = response.json().await.map_err(|err| {
            GiftError::StylizationFailed(format!("unreadable provider response ({status}): {err}"))
        })?;
        match parsed {
            ProviderResponse::Stylized { stylized_image } => {
                let bytes = BASE64_STANDARD
                    .decode(stylized_image.trim_start_matches("data:image/png;base64,"))
                    .map_err(|err| {
                        GiftError::StylizationFailed(format!("bad image encoding: {err}"))
                    })?;
                decode_image(&bytes)
                    .map_err(|err| GiftError::StylizationFailed(format!("bad image: {err}")))
            }
            ProviderResponse::Failed { error } => Err(GiftError::StylizationFailed(error)),
        }
    }
}

#[derive(Debug)]
pub struct Stylized {
    pub image: RgbaImage,
    /// `false` when the standard QR was substituted.
    pub stylized: bool,
}

/// Runs the blender and falls back to the standard QR when the provider fails.
///
/// Caller errors (bad photo, bad parameters) are returned as-is.
pub async fn stylize_or_fallback<B: StyleBlender>(
    blender: Option<&B>,
    request: &BlendRequest<'_>,
    fallback: &QrArtifact,
    cancel: &CancellationToken,
) -> GiftResult<Stylized> {
    request.validate()?;
    let Some(blender) = blender else {
        tracing::info!("No style blender configured, using the standard QR code");
        return Ok(Stylized {
            image: fallback.raster.clone(),
            stylized: false,
        });
    };
    let blended = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(GiftError::Cancelled),
        blended = blender.blend(request) => blended,
    };
    if cancel.is_cancelled() {
        return Err(GiftError::Cancelled);
    }
    match blended {
        Ok(image) => Ok(Stylized {
            image,
            stylized: true,
        }),
        Err(GiftError::StylizationFailed(reason)) => {
            tracing::warn!("Stylization failed, falling back to the standard QR code: {}", reason);
            Ok(Stylized {
                image: fallback.raster.clone(),
                stylized: false,
            })
        }
        Err(err) => Err(err),
    }
}
