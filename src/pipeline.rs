use crate::allocator::{canonical_url, is_valid_id, LinkAllocator};
use crate::blend::{
    stylize_or_fallback, validate_reference_photo, BlendRequest, HttpStyleBlender, StyleBlender,
    Stylized,
};
use crate::canvas::decode_image;
use crate::dao::GiftStore;
use crate::error::{GiftError, GiftResult};
use crate::model::{
    EcLevel, GiftField, GiftLink, GiftRecord, GiftSpecification, OverlaySpec, PosterArtifact,
    PosterSpec, PosterSpecification, QrArtifact, QrRequest, QrSpecification, ShareSheet,
    StylizeSpecification, DEFAULT_FRAME_SIZE,
};
use crate::overlay::overlay;
use crate::poster::render;
use crate::qr::{encode, validate_payload};
use crate::share::{build_targets, clipboard_text};
use crate::utils::decode_base64;
use ab_glyph::FontArc;
use image::RgbaImage;
use tokio_util::sync::CancellationToken;

const MAX_TITLE_CHARS: usize = 120;

/// Share flow of a published gift: link allocation, QR and poster rendering, stylization
/// and share targets.
pub struct SharePipeline<S, B = HttpStyleBlender> {
    allocator: LinkAllocator<S>,
    origin: String,
    blender: Option<B>,
    font: Option<FontArc>,
}

impl<S: GiftStore, B: StyleBlender> SharePipeline<S, B> {
    pub fn new(
        store: S,
        origin: impl Into<String>,
        blender: Option<B>,
        font: Option<FontArc>,
    ) -> Self {
        Self {
            allocator: LinkAllocator::new(store),
            origin: origin.into().trim_end_matches('/').to_string(),
            blender,
            font,
        }
    }

    pub fn canonical_url(&self, unique_id: &str) -> String {
        canonical_url(&self.origin, unique_id)
    }

    /// Allocates an id for `gift` and stores it as published.
    pub async fn publish(
        &self,
        gift: &GiftSpecification,
        cancel: &CancellationToken,
    ) -> GiftResult<GiftLink> {
        validate_gift(gift)?;
        let link = self.allocator.allocate(&self.origin, cancel).await?;
        let store = self.allocator.store();
        let published = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GiftError::Cancelled),
            record = store.publish(&link.unique_id, gift) => record.map_err(GiftError::from),
        };
        match published {
            Ok(record) => {
                tracing::info!(
                    unique_id = %record.unique_id,
                    template = %record.template,
                    "Gift published"
                );
                Ok(link)
            }
            Err(err) => {
                // A claimed row nobody published would hold its id forever.
                if let Err(release_err) = store.release(&link.unique_id).await {
                    tracing::warn!(
                        unique_id = %link.unique_id,
                        "Releasing unpublished id failed: {}",
                        release_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Published gift for `unique_id`. Ids outside the id pattern never reach the store.
    pub async fn published(&self, unique_id: &str) -> GiftResult<Option<GiftRecord>> {
        if !is_valid_id(unique_id) {
            return Ok(None);
        }
        Ok(self.allocator.store().get_published(unique_id).await?)
    }

    pub fn share_sheet(&self, gift: &GiftRecord) -> ShareSheet {
        let url = self.canonical_url(&gift.unique_id);
        ShareSheet {
            targets: build_targets(&url, &gift.title),
            clipboard_text: clipboard_text(&url),
            canonical_url: url,
        }
    }

    /// QR code for the gift's canonical url, with the optional logo laid over it.
    pub async fn qr(
        &self,
        gift: &GiftRecord,
        spec: &QrSpecification,
        cancel: &CancellationToken,
    ) -> GiftResult<QrArtifact> {
        let request = spec.to_request(&self.canonical_url(&gift.unique_id));
        let logo = match &spec.logo {
            Some(logo) => Some(OverlaySpec {
                logo: self.decode_upload(&logo.image_base64, cancel).await?,
                target_area_fraction: logo.target_area_fraction,
            }),
            None => None,
        };
        run_blocking(cancel, move || {
            let artifact = encode(&request)?;
            match logo {
                Some(logo) => overlay(&artifact, &logo),
                None => Ok(artifact),
            }
        })
        .await
    }

    pub async fn poster(
        &self,
        gift: &GiftRecord,
        spec: &PosterSpecification,
        cancel: &CancellationToken,
    ) -> GiftResult<PosterArtifact> {
        let qr = self.qr(gift, &spec.qr, cancel).await?;
        let photo = match &spec.photo_base64 {
            Some(photo) => Some(self.decode_upload(photo, cancel).await?),
            None => None,
        };
        let poster = PosterSpec {
            frame_shape: spec.frame_shape,
            frame_size: spec.frame_size.unwrap_or(DEFAULT_FRAME_SIZE),
            photo,
            title: gift.title.clone(),
            subtitle: spec.subtitle.clone(),
            qr,
        };
        let font = self.font.clone();
        let artifact = run_blocking(cancel, move || render(&poster, font)).await?;
        tracing::info!(unique_id = %gift.unique_id, bytes = artifact.png.len(), "Poster ready");
        Ok(artifact)
    }

    /// Artistic QR for the gift. Falls back to the standard level-H code when the
    /// blender is missing or fails.
    pub async fn stylize(
        &self,
        gift: &GiftRecord,
        spec: &StylizeSpecification,
        cancel: &CancellationToken,
    ) -> GiftResult<Stylized> {
        let url = self.canonical_url(&gift.unique_id);
        let request = QrRequest::new(url.clone(), EcLevel::H);
        let base = run_blocking(cancel, move || encode(&request)).await?;
        let photo = decode_base64(&spec.reference_photo_base64)?;
        let blend = BlendRequest {
            base_qr: &base.raster,
            reference_photo: &photo,
            payload_url: &url,
            strength: spec.strength,
            guidance_scale: spec.guidance_scale,
        };
        let stylized = stylize_or_fallback(self.blender.as_ref(), &blend, &base, cancel).await?;
        tracing::info!(unique_id = %gift.unique_id, stylized = stylized.stylized, "Stylized QR ready");
        Ok(stylized)
    }

    async fn decode_upload(
        &self,
        base64: &str,
        cancel: &CancellationToken,
    ) -> GiftResult<RgbaImage> {
        let bytes = decode_base64(base64)?;
        validate_reference_photo(&bytes)?;
        run_blocking(cancel, move || decode_image(&bytes)).await
    }
}

fn validate_gift(gift: &GiftSpecification) -> GiftResult<()> {
    let title = gift.title.trim();
    if title.is_empty() {
        return Err(GiftError::invalid_payload("the gift needs a title"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(GiftError::invalid_payload(format!(
            "the title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    for field in &gift.fields {
        if let GiftField::Url { name, value } = field {
            validate_payload(value).map_err(|err| {
                GiftError::invalid_payload(format!("field {name} is not a web address ({err})"))
            })?;
        }
    }
    Ok(())
}

/// Runs CPU-bound rendering off the async workers. Cancellation abandons the result.
async fn run_blocking<T, F>(cancel: &CancellationToken, task: F) -> GiftResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> GiftResult<T> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(GiftError::Cancelled);
    }
    let handle = tokio::task::spawn_blocking(task);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GiftError::Cancelled),
        joined = handle => joined.map_err(|err| GiftError::render(format!("render task failed: {err}")))?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::encode_png;
    use crate::dao::MemoryGiftStore;
    use crate::model::{FrameShape, LogoSpecification, TemplateKind};
    use crate::qr::decode_raster;
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;
    use image::Rgba;

    const ORIGIN: &str = "https://gifts.example.com";

    type Pipeline = SharePipeline<MemoryGiftStore, HttpStyleBlender>;

    fn pipeline(store: MemoryGiftStore) -> Pipeline {
        SharePipeline::new(store, format!("{ORIGIN}/"), None, None)
    }

    fn anniversary() -> GiftSpecification {
        GiftSpecification {
            template: TemplateKind::Anniversary,
            title: "Our Anniversary".into(),
            fields: vec![GiftField::Url {
                name: "music".into(),
                value: "https://cdn.example.com/song.mp3".into(),
            }],
        }
    }

    fn png_base64(width: u32, height: u32, color: [u8; 4]) -> String {
        let png = encode_png(&RgbaImage::from_pixel(width, height, Rgba(color))).unwrap();
        format!("data:image/png;base64,{}", BASE64_STANDARD.encode(png))
    }

    async fn published(pipeline: &Pipeline) -> GiftRecord {
        let cancel = CancellationToken::new();
        let link = pipeline.publish(&anniversary(), &cancel).await.unwrap();
        pipeline.published(&link.unique_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn publishing_allocates_and_stores_the_gift() {
        let store = MemoryGiftStore::default();
        let pipeline = pipeline(store.clone());

        let link = pipeline
            .publish(&anniversary(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(link.canonical_url, format!("{ORIGIN}/gift/{}", link.unique_id));
        let record = pipeline.published(&link.unique_id).await.unwrap().unwrap();
        assert_eq!(record.title, "Our Anniversary");
        assert_eq!(record.template, "anniversary");
        assert_eq!(store.claimed_ids(), vec![link.unique_id]);
    }

    #[tokio::test]
    async fn failed_publish_releases_the_claimed_id() {
        let store = MemoryGiftStore::default();
        let pipeline = pipeline(store.clone());
        store.fail_next_publish(1);

        let result = pipeline.publish(&anniversary(), &CancellationToken::new()).await;

        assert!(matches!(result, Err(GiftError::Store(_))));
        assert_eq!(store.claim_attempts(), 1);
        assert!(store.claimed_ids().is_empty());

        let link = pipeline
            .publish(&anniversary(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.claimed_ids(), vec![link.unique_id]);
    }

    #[tokio::test]
    async fn invalid_gifts_are_rejected_before_allocation() {
        let store = MemoryGiftStore::default();
        let pipeline = pipeline(store.clone());
        let cancel = CancellationToken::new();

        let untitled = GiftSpecification {
            title: "  ".into(),
            ..anniversary()
        };
        assert!(matches!(
            pipeline.publish(&untitled, &cancel).await,
            Err(GiftError::InvalidPayload(_))
        ));

        let bad_field = GiftSpecification {
            fields: vec![GiftField::Url {
                name: "music".into(),
                value: "javascript:alert(1)".into(),
            }],
            ..anniversary()
        };
        assert!(matches!(
            pipeline.publish(&bad_field, &cancel).await,
            Err(GiftError::InvalidPayload(_))
        ));
        assert_eq!(store.claim_attempts(), 0);
    }

    #[tokio::test]
    async fn malformed_ids_are_not_looked_up() {
        let pipeline = pipeline(MemoryGiftStore::default());
        assert!(pipeline.published("../etc/passwd").await.unwrap().is_none());
        assert!(pipeline.published("abc123def456").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn share_sheet_points_at_the_canonical_url() {
        let pipeline = pipeline(MemoryGiftStore::default());
        let gift = published(&pipeline).await;

        let sheet = pipeline.share_sheet(&gift);

        assert_eq!(sheet.canonical_url, format!("{ORIGIN}/gift/{}", gift.unique_id));
        assert_eq!(sheet.clipboard_text, sheet.canonical_url);
        assert!(sheet.targets.whatsapp.contains(&gift.unique_id));
    }

    #[tokio::test]
    async fn qr_encodes_the_canonical_url() {
        let pipeline = pipeline(MemoryGiftStore::default());
        let gift = published(&pipeline).await;

        let artifact = pipeline
            .qr(&gift, &QrSpecification::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            decode_raster(&artifact.raster).as_deref(),
            Some(pipeline.canonical_url(&gift.unique_id).as_str())
        );
    }

    #[tokio::test]
    async fn qr_with_small_logo_still_decodes() {
        let pipeline = pipeline(MemoryGiftStore::default());
        let gift = published(&pipeline).await;
        let spec = QrSpecification {
            logo: Some(LogoSpecification {
                image_base64: png_base64(64, 64, [220, 20, 60, 255]),
                target_area_fraction: 0.08,
            }),
            ..QrSpecification::default()
        };

        let artifact = pipeline
            .qr(&gift, &spec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            decode_raster(&artifact.raster).as_deref(),
            Some(pipeline.canonical_url(&gift.unique_id).as_str())
        );
    }

    #[tokio::test]
    async fn oversized_logo_is_rejected() {
        let pipeline = pipeline(MemoryGiftStore::default());
        let gift = published(&pipeline).await;
        let spec = QrSpecification {
            error_correction_level: EcLevel::L,
            logo: Some(LogoSpecification {
                image_base64: png_base64(64, 64, [0, 0, 255, 255]),
                target_area_fraction: 0.3,
            }),
            ..QrSpecification::default()
        };

        let result = pipeline.qr(&gift, &spec, &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(GiftError::OverlayExceedsErrorBudget { .. })
        ));
    }

    #[tokio::test]
    async fn poster_uses_the_stored_title_and_default_frame() {
        let pipeline = pipeline(MemoryGiftStore::default());
        let gift = published(&pipeline).await;
        let spec = PosterSpecification {
            frame_shape: FrameShape::Heart,
            frame_size: None,
            photo_base64: Some(png_base64(40, 30, [10, 120, 200, 255])),
            subtitle: "Scan me".into(),
            qr: QrSpecification::default(),
        };

        let poster = pipeline
            .poster(&gift, &spec, &CancellationToken::new())
            .await
            .unwrap();

        let image = decode_image(&poster.png).unwrap();
        assert_eq!(image.dimensions(), (poster.width, poster.height));
        assert_eq!(image.get_pixel(600, 1420), &Rgba([10, 120, 200, 255]));
    }

    #[tokio::test]
    async fn undecodable_photo_is_a_validation_error() {
        let pipeline = pipeline(MemoryGiftStore::default());
        let gift = published(&pipeline).await;
        let spec = PosterSpecification {
            frame_shape: FrameShape::Circle,
            frame_size: Some(400),
            photo_base64: Some(BASE64_STANDARD.encode(b"not an image")),
            subtitle: String::new(),
            qr: QrSpecification::default(),
        };

        let result = pipeline.poster(&gift, &spec, &CancellationToken::new()).await;

        assert!(matches!(result, Err(GiftError::ImageValidationFailed { .. })));
    }

    #[tokio::test]
    async fn stylize_without_blender_returns_the_standard_code() {
        let pipeline = pipeline(MemoryGiftStore::default());
        let gift = published(&pipeline).await;
        let spec = StylizeSpecification {
            reference_photo_base64: png_base64(16, 16, [200, 180, 160, 255]),
            strength: 0.5,
            guidance_scale: 7.5,
        };

        let stylized = pipeline
            .stylize(&gift, &spec, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!stylized.stylized);
        assert_eq!(
            decode_raster(&stylized.image).as_deref(),
            Some(pipeline.canonical_url(&gift.unique_id).as_str())
        );
    }

    #[tokio::test]
    async fn cancelled_requests_do_no_work() {
        let store = MemoryGiftStore::default();
        let pipeline = pipeline(store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            pipeline.publish(&anniversary(), &cancel).await,
            Err(GiftError::Cancelled)
        ));
        assert!(store.claimed_ids().is_empty());

        let gift = published(&pipeline).await;
        assert!(matches!(
            pipeline.qr(&gift, &QrSpecification::default(), &cancel).await,
            Err(GiftError::Cancelled)
        ));
    }
}
