use crate::error::{GiftError, GiftResult};
use crate::model::{QrArtifact, QrRequest};
use image::{Rgba, RgbaImage};
use qrcode::QrCode;
use url::Url;

const MAX_SIZE_PX: u32 = 4096;
const MAX_MARGIN_MODULES: u32 = 16;

/// Accepts absolute http(s) urls with a host, the only payloads a gift QR carries.
pub fn validate_payload(payload: &str) -> GiftResult<Url> {
    let url = Url::parse(payload)
        .map_err(|err| GiftError::invalid_payload(format!("malformed url: {err}")))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        scheme => Err(GiftError::invalid_payload(format!(
            "unsupported url scheme or missing host: {scheme}"
        ))),
    }
}

/// Parses a `#RRGGBB` color.
pub fn parse_color(text: &str) -> GiftResult<Rgba<u8>> {
    let digits = text.trim().trim_start_matches('#');
    if digits.len() != 6 {
        return Err(GiftError::invalid_payload(format!("invalid color: {text}")));
    }
    let bytes = hex::decode(digits)
        .map_err(|_| GiftError::invalid_payload(format!("invalid color: {text}")))?;
    Ok(Rgba([bytes[0], bytes[1], bytes[2], 255]))
}

/// Encodes the request payload at the smallest QR version that fits the requested level.
///
/// Mask selection is left to the encoder, which scores all eight patterns and keeps the
/// one with the lowest penalty.
pub fn encode(request: &QrRequest) -> GiftResult<QrArtifact> {
    validate_payload(&request.payload)?;
    if request.size_px == 0 || request.size_px > MAX_SIZE_PX {
        return Err(GiftError::invalid_payload(format!(
            "sizePx must be between 1 and {MAX_SIZE_PX}"
        )));
    }
    if request.margin_modules > MAX_MARGIN_MODULES {
        return Err(GiftError::invalid_payload(format!(
            "marginModules must be at most {MAX_MARGIN_MODULES}"
        )));
    }
    let dark = parse_color(&request.dark_color)?;
    let light = parse_color(&request.light_color)?;
    if dark == light {
        return Err(GiftError::invalid_payload(
            "dark and light colors must differ",
        ));
    }

    let code = QrCode::with_error_correction_level(
        request.payload.as_bytes(),
        request.error_correction_level.into(),
    )
    .map_err(|err| GiftError::invalid_payload(format!("cannot encode payload: {err}")))?;

    let module_count = code.width() as u32;
    let margin = request.margin_modules;
    let total_modules = module_count + 2 * margin;
    let module_px = (request.size_px / total_modules).max(1);
    let side = total_modules * module_px;
    let colors = code.to_colors();

    let raster = RgbaImage::from_fn(side, side, |x, y| {
        let (mx, my) = (x / module_px, y / module_px);
        let inside = (margin..margin + module_count).contains(&mx)
            && (margin..margin + module_count).contains(&my);
        if !inside {
            return light;
        }
        let index = ((my - margin) * module_count + (mx - margin)) as usize;
        match colors[index] {
            qrcode::Color::Dark => dark,
            qrcode::Color::Light => light,
        }
    });

    tracing::debug!(
        version = ?code.version(),
        module_count,
        module_px,
        side,
        "QR code encoded"
    );

    Ok(QrArtifact {
        raster,
        module_count,
        error_correction_level: request.error_correction_level,
        module_px,
        margin_modules: margin,
    })
}

/// Reads the first QR symbol found in `raster`.
#[cfg(test)]
pub fn decode_raster(raster: &RgbaImage) -> Option<String> {
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        raster.width() as usize,
        raster.height() as usize,
        |x, y| {
            let p = raster.get_pixel(x as u32, y as u32);
            ((p[0] as u32 * 299 + p[1] as u32 * 587 + p[2] as u32 * 114) / 1000) as u8
        },
    );
    let grids = prepared.detect_grids();
    grids.first()?.decode().ok().map(|(_, content)| content)
}
