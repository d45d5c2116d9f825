use crate::error::{GiftError, GiftResult};
use ab_glyph::{point, Font, FontArc, GlyphId, PxScale, ScaleFont};
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use tiny_skia::{
    ColorU8, FillRule, GradientStop, Mask, Paint, PathBuilder, Pixmap, PixmapPaint,
    PremultipliedColorU8, RadialGradient, SpreadMode, Transform,
};

const BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// Cubic control distance approximating a quarter circle.
const KAPPA: f32 = 0.552_284_8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathCommand {
    MoveTo(f32, f32),
    LineTo(f32, f32),
    QuadTo(f32, f32, f32, f32),
    CubicTo(f32, f32, f32, f32, f32, f32),
    Close,
}

/// A closed shape described independently of the drawing backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outline {
    commands: Vec<PathCommand>,
}

impl Outline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(mut self, x: f32, y: f32) -> Self {
        self.commands.push(PathCommand::MoveTo(x, y));
        self
    }

    pub fn line_to(mut self, x: f32, y: f32) -> Self {
        self.commands.push(PathCommand::LineTo(x, y));
        self
    }

    pub fn quad_to(mut self, x1: f32, y1: f32, x: f32, y: f32) -> Self {
        self.commands.push(PathCommand::QuadTo(x1, y1, x, y));
        self
    }

    pub fn cubic_to(mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) -> Self {
        self.commands.push(PathCommand::CubicTo(x1, y1, x2, y2, x, y));
        self
    }

    pub fn close(mut self) -> Self {
        self.commands.push(PathCommand::Close);
        self
    }

    pub fn rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new()
            .move_to(x, y)
            .line_to(x + width, y)
            .line_to(x + width, y + height)
            .line_to(x, y + height)
            .close()
    }

    pub fn rounded_rect(x: f32, y: f32, width: f32, height: f32, radius: f32) -> Self {
        let r = radius.min(width / 2.0).min(height / 2.0);
        Self::new()
            .move_to(x + r, y)
            .line_to(x + width - r, y)
            .quad_to(x + width, y, x + width, y + r)
            .line_to(x + width, y + height - r)
            .quad_to(x + width, y + height, x + width - r, y + height)
            .line_to(x + r, y + height)
            .quad_to(x, y + height, x, y + height - r)
            .line_to(x, y + r)
            .quad_to(x, y, x + r, y)
            .close()
    }

    pub fn circle(cx: f32, cy: f32, radius: f32) -> Self {
        let k = radius * KAPPA;
        Self::new()
            .move_to(cx + radius, cy)
            .cubic_to(cx + radius, cy + k, cx + k, cy + radius, cx, cy + radius)
            .cubic_to(cx - k, cy + radius, cx - radius, cy + k, cx - radius, cy)
            .cubic_to(cx - radius, cy - k, cx - k, cy - radius, cx, cy - radius)
            .cubic_to(cx + k, cy - radius, cx + radius, cy - k, cx + radius, cy)
            .close()
    }

    pub fn commands(&self) -> &[PathCommand] {
        &self.commands
    }

    /// Axis-aligned bounds of all points, control points included.
    pub fn bounds(&self) -> Option<(f32, f32, f32, f32)> {
        let points = self.commands.iter().flat_map(|command| match *command {
            PathCommand::MoveTo(x, y) | PathCommand::LineTo(x, y) => vec![(x, y)],
            PathCommand::QuadTo(x1, y1, x, y) => vec![(x1, y1), (x, y)],
            PathCommand::CubicTo(x1, y1, x2, y2, x, y) => vec![(x1, y1), (x2, y2), (x, y)],
            PathCommand::Close => vec![],
        });
        points.fold(None, |acc, (x, y)| match acc {
            None => Some((x, y, x, y)),
            Some((min_x, min_y, max_x, max_y)) => {
                Some((min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)))
            }
        })
    }

    fn to_skia_path(&self) -> Option<tiny_skia::Path> {
        let mut builder = PathBuilder::new();
        for command in &self.commands {
            match *command {
                PathCommand::MoveTo(x, y) => builder.move_to(x, y),
                PathCommand::LineTo(x, y) => builder.line_to(x, y),
                PathCommand::QuadTo(x1, y1, x, y) => builder.quad_to(x1, y1, x, y),
                PathCommand::CubicTo(x1, y1, x2, y2, x, y) => {
                    builder.cubic_to(x1, y1, x2, y2, x, y)
                }
                PathCommand::Close => builder.close(),
            }
        }
        builder.finish()
    }
}

/// Minimal drawing surface the poster and overlay compositors render through.
pub trait Surface {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Fills the whole surface with a radial gradient from `inner` at `center` to `outer`
    /// at `radius`.
    fn fill_radial_gradient(
        &mut self,
        center: (f32, f32),
        radius: f32,
        inner: Rgba<u8>,
        outer: Rgba<u8>,
    );

    fn fill_path(&mut self, outline: &Outline, color: Rgba<u8>);

    /// Draws `image` at its native size with its top-left corner at `(x, y)`.
    fn draw_image(&mut self, image: &RgbaImage, x: f32, y: f32, clip: Option<&Outline>);

    fn draw_text(
        &mut self,
        text: &str,
        center_x: f32,
        baseline_y: f32,
        size_px: f32,
        color: Rgba<u8>,
    );
}

/// CPU raster surface backed by a tiny-skia pixmap.
pub struct PixmapSurface {
    pixmap: Pixmap,
    font: Option<FontArc>,
}

impl PixmapSurface {
    pub fn new(width: u32, height: u32, font: Option<FontArc>) -> GiftResult<Self> {
        let pixmap = Pixmap::new(width, height)
            .ok_or_else(|| GiftError::render(format!("cannot allocate {width}x{height} surface")))?;
        Ok(Self { pixmap, font })
    }

    pub fn from_image(image: &RgbaImage) -> GiftResult<Self> {
        Ok(Self {
            pixmap: pixmap_from_rgba(image)?,
            font: None,
        })
    }

    pub fn into_image(self) -> RgbaImage {
        rgba_from_pixmap(&self.pixmap)
    }

    fn mask_for(&self, outline: &Outline) -> Option<Mask> {
        let path = outline.to_skia_path()?;
        let mut mask = Mask::new(self.pixmap.width(), self.pixmap.height())?;
        mask.fill_path(&path, FillRule::Winding, true, Transform::identity());
        Some(mask)
    }
}

impl Surface for PixmapSurface {
    fn width(&self) -> u32 {
        self.pixmap.width()
    }

    fn height(&self) -> u32 {
        self.pixmap.height()
    }

    fn fill_radial_gradient(
        &mut self,
        center: (f32, f32),
        radius: f32,
        inner: Rgba<u8>,
        outer: Rgba<u8>,
    ) {
        let center = tiny_skia::Point::from_xy(center.0, center.1);
        let shader = RadialGradient::new(
            center,
            center,
            radius,
            vec![
                GradientStop::new(0.0, skia_color(inner)),
                GradientStop::new(1.0, skia_color(outer)),
            ],
            SpreadMode::Pad,
            Transform::identity(),
        );
        let (Some(shader), Some(rect)) = (
            shader,
            tiny_skia::Rect::from_xywh(0.0, 0.0, self.width() as f32, self.height() as f32),
        ) else {
            tracing::warn!("Degenerate gradient skipped");
            return;
        };
        let paint = Paint {
            shader,
            anti_alias: true,
            ..Paint::default()
        };
        self.pixmap.fill_rect(rect, &paint, Transform::identity(), None);
    }

    fn fill_path(&mut self, outline: &Outline, color: Rgba<u8>) {
        let Some(path) = outline.to_skia_path() else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color(skia_color(color));
        paint.anti_alias = true;
        self.pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    }

    fn draw_image(&mut self, image: &RgbaImage, x: f32, y: f32, clip: Option<&Outline>) {
        let source = match pixmap_from_rgba(image) {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!("Image layer skipped: {}", err);
                return;
            }
        };
        let mask = clip.and_then(|outline| self.mask_for(outline));
        self.pixmap.draw_pixmap(
            x.round() as i32,
            y.round() as i32,
            source.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            mask.as_ref(),
        );
    }

    fn draw_text(
        &mut self,
        text: &str,
        center_x: f32,
        baseline_y: f32,
        size_px: f32,
        color: Rgba<u8>,
    ) {
        let Some(font) = self.font.as_ref() else {
            tracing::debug!("No font configured, text layer skipped");
            return;
        };
        let scale = PxScale::from(size_px);
        let scaled = font.as_scaled(scale);

        let mut caret = 0.0;
        let mut previous: Option<GlyphId> = None;
        let mut glyphs = Vec::new();
        for ch in text.chars().filter(|ch| !ch.is_control()) {
            let id = scaled.glyph_id(ch);
            if let Some(previous) = previous {
                caret += scaled.kern(previous, id);
            }
            glyphs.push((id, caret));
            caret += scaled.h_advance(id);
            previous = Some(id);
        }

        let origin_x = center_x - caret / 2.0;
        let pixmap = &mut self.pixmap;
        for (id, offset) in glyphs {
            let glyph = id.with_scale_and_position(scale, point(origin_x + offset, baseline_y));
            let Some(outlined) = font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i32 + gx as i32;
                let py = bounds.min.y as i32 + gy as i32;
                blend_pixel(pixmap, px, py, color, coverage);
            });
        }
    }
}

fn skia_color(color: Rgba<u8>) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba8(color[0], color[1], color[2], color[3])
}

/// Source-over blend of `color` at `coverage` into one pixel.
fn blend_pixel(pixmap: &mut Pixmap, x: i32, y: i32, color: Rgba<u8>, coverage: f32) {
    if x < 0 || y < 0 || x as u32 >= pixmap.width() || y as u32 >= pixmap.height() {
        return;
    }
    let index = (y as u32 * pixmap.width() + x as u32) as usize;
    let alpha = coverage.clamp(0.0, 1.0) * color[3] as f32 / 255.0;
    let dst = pixmap.pixels()[index];
    let mix = |src: u8, dst: u8| src as f32 * alpha + dst as f32 * (1.0 - alpha);
    let a = (255.0 * alpha + dst.alpha() as f32 * (1.0 - alpha)).round().min(255.0) as u8;
    let channel = |value: f32| (value.round() as u8).min(a);
    let blended = PremultipliedColorU8::from_rgba(
        channel(mix(color[0], dst.red())),
        channel(mix(color[1], dst.green())),
        channel(mix(color[2], dst.blue())),
        a,
    );
    if let Some(blended) = blended {
        pixmap.pixels_mut()[index] = blended;
    }
}

pub fn pixmap_from_rgba(image: &RgbaImage) -> GiftResult<Pixmap> {
    let mut pixmap = Pixmap::new(image.width(), image.height()).ok_or_else(|| {
        GiftError::render(format!(
            "cannot allocate {}x{} pixmap",
            image.width(),
            image.height()
        ))
    })?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
        *dst = ColorU8::from_rgba(src[0], src[1], src[2], src[3]).premultiply();
    }
    Ok(pixmap)
}

pub fn rgba_from_pixmap(pixmap: &Pixmap) -> RgbaImage {
    let mut image = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in image.pixels_mut().zip(pixmap.pixels()) {
        let color = src.demultiply();
        *dst = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    image
}

pub fn encode_png(image: &RgbaImage) -> GiftResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|err| GiftError::render(format!("failed to encode PNG: {err}")))?;
    Ok(buffer.into_inner())
}

pub fn decode_image(bytes: &[u8]) -> GiftResult<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|image| image.to_rgba8())
        .map_err(|err| GiftError::image_validation(format!("cannot decode image: {err}")))
}

/// Font shipped with the crate, used when no poster font is configured.
pub fn bundled_font() -> GiftResult<FontArc> {
    FontArc::try_from_slice(BUNDLED_FONT)
        .map_err(|err| GiftError::render(format!("invalid bundled font: {err}")))
}

pub fn load_font(path: &Path) -> GiftResult<FontArc> {
    let bytes = std::fs::read(path)
        .map_err(|err| GiftError::render(format!("cannot read font {}: {err}", path.display())))?;
    FontArc::try_from_vec(bytes)
        .map_err(|err| GiftError::render(format!("invalid font {}: {err}", path.display())))
}

#[cfg(test)]
pub use recording::{DrawOp, RecordingSurface};


#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    #[test]
    fn circle_bounds() {
        let (min_x, min_y, max_x, max_y) = Outline::circle(50.0, 60.0, 10.0).bounds().unwrap();
        assert_eq!((min_x, min_y, max_x, max_y), (40.0, 50.0, 60.0, 70.0));
    }

    #[test]
    fn filled_rect_covers_its_pixels_only() {
        let mut surface = PixmapSurface::new(20, 20, None).unwrap();
        surface.fill_path(&Outline::rect(5.0, 5.0, 10.0, 10.0), RED);
        let image = surface.into_image();
        assert_eq!(image.get_pixel(10, 10), &RED);
        assert_eq!(image.get_pixel(1, 1)[3], 0);
    }

    #[test]
    fn clipped_image_stays_inside_clip() {
        let mut surface = PixmapSurface::new(40, 40, None).unwrap();
        let photo = RgbaImage::from_pixel(40, 40, RED);
        surface.draw_image(&photo, 0.0, 0.0, Some(&Outline::circle(20.0, 20.0, 10.0)));
        let image = surface.into_image();
        assert_eq!(image.get_pixel(20, 20), &RED);
        assert_eq!(image.get_pixel(2, 2)[3], 0);
    }

    #[test]
    fn gradient_runs_from_inner_to_outer() {
        let mut surface = PixmapSurface::new(100, 100, None).unwrap();
        let white = Rgba([255, 255, 255, 255]);
        let black = Rgba([0, 0, 0, 255]);
        surface.fill_radial_gradient((50.0, 50.0), 50.0, white, black);
        let image = surface.into_image();
        assert!(image.get_pixel(50, 50)[0] > 240);
        assert!(image.get_pixel(0, 0)[0] < 15);
    }

    #[test]
    fn text_without_font_is_a_no_op() {
        let mut surface = PixmapSurface::new(10, 10, None).unwrap();
        surface.draw_text("Happy birthday", 5.0, 5.0, 12.0, RED);
        assert!(surface.into_image().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn text_is_drawn_centered_on_the_anchor() {
        let font = bundled_font().unwrap();
        let mut surface = PixmapSurface::new(400, 100, Some(font)).unwrap();
        surface.draw_text("Happy birthday", 200.0, 60.0, 32.0, RED);
        let image = surface.into_image();

        let inked: Vec<(u32, u32)> = image
            .enumerate_pixels()
            .filter(|(_, _, pixel)| pixel[3] > 0)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!inked.is_empty());
        let min_x = inked.iter().map(|(x, _)| *x).min().unwrap();
        let max_x = inked.iter().map(|(x, _)| *x).max().unwrap();
        let max_y = inked.iter().map(|(_, y)| *y).max().unwrap();
        assert!(((min_x + max_x) as f32 / 2.0 - 200.0).abs() < 8.0, "{min_x}..{max_x}");
        assert!(max_x - min_x > 100);
        // Only the descender of "y" reaches below the baseline.
        assert!(max_y <= 72);
    }

    #[test]
    fn text_pixels_take_the_requested_color() {
        let font = bundled_font().unwrap();
        let mut surface = PixmapSurface::new(200, 80, Some(font)).unwrap();
        surface.fill_path(&Outline::rect(0.0, 0.0, 200.0, 80.0), Rgba([255, 255, 255, 255]));
        surface.draw_text("HI", 100.0, 60.0, 48.0, Rgba([0, 0, 255, 255]));
        let image = surface.into_image();
        assert!(image.pixels().any(|p| p == &Rgba([0, 0, 255, 255])));
        assert!(image.pixels().all(|p| p[3] == 255 && p[0] == p[1]));
    }

    #[test]
    fn rgba_survives_pixmap_conversion_when_opaque() {
        let image = RgbaImage::from_fn(4, 4, |x, y| Rgba([x as u8 * 60, y as u8 * 60, 7, 255]));
        let back = rgba_from_pixmap(&pixmap_from_rgba(&image).unwrap());
        assert_eq!(image, back);
    }

    #[test]
    fn png_signature() {
        let png = encode_png(&RgbaImage::from_pixel(2, 2, RED)).unwrap();
        assert!(png.starts_with(&[0x89, 0x50, 0x4E, 0x47]));
        assert_eq!(decode_image(&png).unwrap().get_pixel(0, 0), &RED);
    }

    #[test]
    fn garbage_bytes_fail_validation() {
        assert!(matches!(
            decode_image(b"not an image"),
            Err(GiftError::ImageValidationFailed { .. })
        ));
    }
}
