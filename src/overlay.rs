use crate::canvas::{Outline, PixmapSurface, Surface};
use crate::error::{GiftError, GiftResult};
use crate::model::{EcLevel, OverlaySpec, QrArtifact};
use image::imageops::{self, FilterType};
use image::Rgba;

/// Share of the symbol area a level-H code tolerates being covered. Kept below the 30%
/// codeword budget so scanners with imperfect sampling still decode.
pub const SAFE_FRACTION_AT_H: f32 = 0.20;
/// Padding ring between plate edge and logo, relative to the plate side.
const PADDING_RATIO: f32 = 0.08;
const CORNER_RATIO: f32 = 0.18;
const PLATE_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Largest symbol-area fraction a logo may cover at `level`.
///
/// A centered plate wipes out whole codewords, and the lower levels lose more of their
/// budget to damaged blocks than their nominal recovery share suggests. Each value sits
/// a little under the largest fraction that still decodes for gift urls.
pub fn safe_fraction(level: EcLevel) -> f32 {
    match level {
        EcLevel::L => 0.035,
        EcLevel::M => 0.08,
        EcLevel::Q => 0.13,
        EcLevel::H => SAFE_FRACTION_AT_H,
    }
}

/// Returns a copy of `artifact` with `spec.logo` centered on a white backing plate.
///
/// The plate covers `target_area_fraction` of the symbol (quiet zone excluded); the logo
/// is fitted inside it, keeping its aspect ratio.
pub fn overlay(artifact: &QrArtifact, spec: &OverlaySpec) -> GiftResult<QrArtifact> {
    let requested = spec.target_area_fraction;
    let safe = safe_fraction(artifact.error_correction_level);
    if !(requested > 0.0 && requested <= safe) {
        tracing::debug!(requested, safe, level = ?artifact.error_correction_level, "Overlay rejected");
        return Err(GiftError::OverlayExceedsErrorBudget { requested, safe });
    }
    let (logo_width, logo_height) = spec.logo.dimensions();
    if logo_width == 0 || logo_height == 0 {
        return Err(GiftError::image_validation("logo image is empty"));
    }

    let (symbol_x, symbol_y, symbol_side) = artifact.symbol_bounds();
    let symbol_side = symbol_side as f32;
    let plate_side = (requested * symbol_side * symbol_side).sqrt();
    let plate_x = symbol_x as f32 + (symbol_side - plate_side) / 2.0;
    let plate_y = symbol_y as f32 + (symbol_side - plate_side) / 2.0;

    let inner_side = plate_side * (1.0 - 2.0 * PADDING_RATIO);
    let scale = (inner_side / logo_width as f32).min(inner_side / logo_height as f32);
    let fitted_width = ((logo_width as f32 * scale).round() as u32).max(1);
    let fitted_height = ((logo_height as f32 * scale).round() as u32).max(1);
    let logo = imageops::resize(&spec.logo, fitted_width, fitted_height, FilterType::Lanczos3);

    let mut surface = PixmapSurface::from_image(&artifact.raster)?;
    surface.fill_path(
        &Outline::rounded_rect(
            plate_x,
            plate_y,
            plate_side,
            plate_side,
            plate_side * CORNER_RATIO,
        ),
        PLATE_COLOR,
    );
    surface.draw_image(
        &logo,
        plate_x + (plate_side - fitted_width as f32) / 2.0,
        plate_y + (plate_side - fitted_height as f32) / 2.0,
        None,
    );

    Ok(QrArtifact {
        raster: surface.into_image(),
        module_count: artifact.module_count,
        error_correction_level: artifact.error_correction_level,
        module_px: artifact.module_px,
        margin_modules: artifact.margin_modules,
    })
}
