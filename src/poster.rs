use crate::canvas::{encode_png, Outline, PixmapSurface, Surface};
use crate::error::{GiftError, GiftResult};
use crate::model::{FrameShape, PosterArtifact, PosterSpec};
use ab_glyph::FontArc;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use image::imageops::{self, FilterType};
use image::Rgba;

pub const CANVAS_WIDTH: u32 = 1200;
pub const CANVAS_HEIGHT: u32 = 1800;
pub const MAX_FRAME_SIZE: u32 = 600;
/// Longest edge the scaled-to-cover photo layer may have before clipping.
pub const MAX_COVER_EDGE: u32 = 4 * MAX_FRAME_SIZE;

const QR_DISPLAY_SIZE: u32 = 560;
const QR_TOP: f32 = 260.0;
const SHADOW_OFFSET: f32 = 14.0;
const SHADOW_LAYERS: u32 = 4;
const SHADOW_SPREAD: f32 = 6.0;
const TITLE_BASELINE: f32 = 960.0;
const TITLE_SIZE: f32 = 64.0;
const SUBTITLE_BASELINE: f32 = 1030.0;
const SUBTITLE_SIZE: f32 = 36.0;
const FRAME_CENTER_Y: f32 = 1420.0;
const FRAME_BORDER: f32 = 12.0;

const BACKGROUND_INNER: Rgba<u8> = Rgba([255, 241, 242, 255]);
const BACKGROUND_OUTER: Rgba<u8> = Rgba([251, 113, 133, 255]);
const SHADOW: Rgba<u8> = Rgba([76, 5, 25, 24]);
const TITLE_COLOR: Rgba<u8> = Rgba([136, 19, 55, 255]);
const SUBTITLE_COLOR: Rgba<u8> = Rgba([159, 18, 57, 255]);
const FRAME_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Closed heart outline fitting a `size` square centered on `(cx, cy)`.
pub fn heart(cx: f32, cy: f32, size: f32) -> Outline {
    let left = cx - size / 2.0;
    let right = cx + size / 2.0;
    let top = cy - size / 2.0;
    let notch = top + 0.3 * size;
    Outline::new()
        .move_to(cx, notch)
        .cubic_to(cx, top, left, top, left, notch)
        .cubic_to(left, top + 0.6 * size, cx, top + 0.8 * size, cx, top + size)
        .cubic_to(cx, top + 0.8 * size, right, top + 0.6 * size, right, notch)
        .cubic_to(right, top, cx, top, cx, notch)
        .close()
}

pub fn frame_outline(shape: FrameShape, cx: f32, cy: f32, size: f32) -> Outline {
    match shape {
        FrameShape::Circle => Outline::circle(cx, cy, size / 2.0),
        FrameShape::Heart => heart(cx, cy, size),
        FrameShape::Box => Outline::rect(cx - size / 2.0, cy - size / 2.0, size, size),
    }
}

/// Scale-to-cover factor of a `width`x`height` photo into a square frame.
pub fn cover_scale(frame_size: u32, width: u32, height: u32) -> f32 {
    let frame = frame_size as f32;
    (frame / width as f32).max(frame / height as f32)
}

/// Size of the photo layer scaled to cover the frame. Photos too elongated to cover it
/// within `MAX_COVER_EDGE` are rejected.
pub fn cover_layer(frame_size: u32, width: u32, height: u32) -> GiftResult<(u32, u32)> {
    if width == 0 || height == 0 {
        return Err(GiftError::image_validation("the photo is empty"));
    }
    let scale = cover_scale(frame_size, width, height);
    let layer_width = (width as f32 * scale).round();
    let layer_height = (height as f32 * scale).round();
    if layer_width.max(layer_height) > MAX_COVER_EDGE as f32 {
        return Err(GiftError::image_validation(format!(
            "the photo is {width}x{height}, too narrow or too wide to fill the frame"
        )));
    }
    Ok(((layer_width as u32).max(1), (layer_height as u32).max(1)))
}

/// Draws the poster for `spec` onto `surface`. Output depends on `spec` alone.
pub fn compose<S: Surface>(spec: &PosterSpec, surface: &mut S) -> GiftResult<()> {
    if spec.frame_size == 0 || spec.frame_size > MAX_FRAME_SIZE {
        return Err(GiftError::invalid_payload(format!(
            "frameSize must be between 1 and {MAX_FRAME_SIZE}"
        )));
    }
    let photo_layer = match &spec.photo {
        Some(photo) => Some(cover_layer(spec.frame_size, photo.width(), photo.height())?),
        None => None,
    };
    let width = surface.width() as f32;
    let height = surface.height() as f32;
    let center_x = width / 2.0;

    surface.fill_radial_gradient(
        (center_x, height / 3.0),
        width.max(height) * 0.75,
        BACKGROUND_INNER,
        BACKGROUND_OUTER,
    );

    let qr = imageops::resize(
        &spec.qr.raster,
        QR_DISPLAY_SIZE,
        QR_DISPLAY_SIZE,
        FilterType::Nearest,
    );
    let qr_x = center_x - QR_DISPLAY_SIZE as f32 / 2.0;
    for layer in (1..=SHADOW_LAYERS).rev() {
        let spread = SHADOW_SPREAD * layer as f32;
        surface.fill_path(
            &Outline::rounded_rect(
                qr_x - spread,
                QR_TOP + SHADOW_OFFSET - spread,
                QR_DISPLAY_SIZE as f32 + 2.0 * spread,
                QR_DISPLAY_SIZE as f32 + 2.0 * spread,
                spread * 2.0,
            ),
            SHADOW,
        );
    }
    surface.draw_image(&qr, qr_x, QR_TOP, None);

    surface.draw_text(&spec.title, center_x, TITLE_BASELINE, TITLE_SIZE, TITLE_COLOR);
    if !spec.subtitle.is_empty() {
        surface.draw_text(
            &spec.subtitle,
            center_x,
            SUBTITLE_BASELINE,
            SUBTITLE_SIZE,
            SUBTITLE_COLOR,
        );
    }

    if let (Some(photo), Some((layer_width, layer_height))) = (&spec.photo, photo_layer) {
        let frame_size = spec.frame_size as f32;
        surface.fill_path(
            &frame_outline(
                spec.frame_shape,
                center_x,
                FRAME_CENTER_Y,
                frame_size + 2.0 * FRAME_BORDER,
            ),
            FRAME_COLOR,
        );

        let layer = imageops::resize(photo, layer_width, layer_height, FilterType::Triangle);
        let clip = frame_outline(spec.frame_shape, center_x, FRAME_CENTER_Y, frame_size);
        surface.draw_image(
            &layer,
            center_x - layer_width as f32 / 2.0,
            FRAME_CENTER_Y - layer_height as f32 / 2.0,
            Some(&clip),
        );
    }
    Ok(())
}

/// Rasterizes the poster to PNG. `font` renders the title and subtitle.
pub fn render(spec: &PosterSpec, font: Option<FontArc>) -> GiftResult<PosterArtifact> {
    let mut surface = PixmapSurface::new(CANVAS_WIDTH, CANVAS_HEIGHT, font)?;
    compose(spec, &mut surface)?;
    let png = encode_png(&surface.into_image())?;
    tracing::debug!(bytes = png.len(), shape = ?spec.frame_shape, "Poster rendered");
    Ok(PosterArtifact {
        png,
        width: CANVAS_WIDTH,
        height: CANVAS_HEIGHT,
    })
}

impl PosterArtifact {
    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", BASE64_STANDARD.encode(&self.png))
    }
}

/// `{title}-poster.png`, with the title reduced to file-name safe characters.
pub fn poster_filename(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|ch| if ch.is_whitespace() { '-' } else { ch })
        .filter(|ch| ch.is_alphanumeric() || *ch == '-' || *ch == '_')
        .take(80)
        .collect();
    if stem.is_empty() {
        "gift-poster.png".into()
    } else {
        format!("{stem}-poster.png")
    }
}
