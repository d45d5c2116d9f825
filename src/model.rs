use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

pub const DEFAULT_QR_SIZE_PX: u32 = 512;
pub const DEFAULT_MARGIN_MODULES: u32 = 4;
pub const DEFAULT_FRAME_SIZE: u32 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftLink {
    pub unique_id: String,
    pub canonical_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EcLevel {
    L,
    M,
    Q,
    #[default]
    H,
}

impl EcLevel {
    /// Share of modules that may be wrong while the symbol still decodes.
    pub fn recovery_percent(self) -> f32 {
        match self {
            EcLevel::L => 7.0,
            EcLevel::M => 15.0,
            EcLevel::Q => 25.0,
            EcLevel::H => 30.0,
        }
    }
}

impl From<EcLevel> for qrcode::EcLevel {
    fn from(level: EcLevel) -> Self {
        match level {
            EcLevel::L => qrcode::EcLevel::L,
            EcLevel::M => qrcode::EcLevel::M,
            EcLevel::Q => qrcode::EcLevel::Q,
            EcLevel::H => qrcode::EcLevel::H,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrRequest {
    pub payload: String,
    #[serde(default = "default_qr_size")]
    pub size_px: u32,
    #[serde(default)]
    pub error_correction_level: EcLevel,
    #[serde(default = "default_dark_color")]
    pub dark_color: String,
    #[serde(default = "default_light_color")]
    pub light_color: String,
    #[serde(default = "default_margin_modules")]
    pub margin_modules: u32,
}

impl QrRequest {
    pub fn new(payload: impl Into<String>, error_correction_level: EcLevel) -> Self {
        Self {
            payload: payload.into(),
            size_px: DEFAULT_QR_SIZE_PX,
            error_correction_level,
            dark_color: default_dark_color(),
            light_color: default_light_color(),
            margin_modules: DEFAULT_MARGIN_MODULES,
        }
    }
}

fn default_qr_size() -> u32 {
    DEFAULT_QR_SIZE_PX
}

fn default_dark_color() -> String {
    "#000000".into()
}

fn default_light_color() -> String {
    "#ffffff".into()
}

fn default_margin_modules() -> u32 {
    DEFAULT_MARGIN_MODULES
}

#[derive(Debug, Clone)]
pub struct QrArtifact {
    pub raster: RgbaImage,
    pub module_count: u32,
    pub error_correction_level: EcLevel,
    /// Edge length of one module in pixels.
    pub module_px: u32,
    pub margin_modules: u32,
}

impl QrArtifact {
    /// Pixel bounds `(x, y, side)` of the symbol without its quiet zone.
    pub fn symbol_bounds(&self) -> (u32, u32, u32) {
        let offset = self.margin_modules * self.module_px;
        (offset, offset, self.module_count * self.module_px)
    }
}

#[derive(Debug, Clone)]
pub struct OverlaySpec {
    pub logo: RgbaImage,
    pub target_area_fraction: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameShape {
    #[default]
    Circle,
    Heart,
    Box,
}

#[derive(Debug, Clone)]
pub struct PosterSpec {
    pub frame_shape: FrameShape,
    pub frame_size: u32,
    pub photo: Option<RgbaImage>,
    pub title: String,
    pub subtitle: String,
    pub qr: QrArtifact,
}

#[derive(Debug, Clone)]
pub struct PosterArtifact {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareTargets {
    pub whatsapp: String,
    pub email: String,
    pub sms: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareSheet {
    pub canonical_url: String,
    pub targets: ShareTargets,
    pub clipboard_text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PosterDownload {
    pub data_url: String,
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplateKind {
    Anniversary,
    Valentine,
    Birthday,
    NewYear,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateKind::Anniversary => "anniversary",
            TemplateKind::Valentine => "valentine",
            TemplateKind::Birthday => "birthday",
            TemplateKind::NewYear => "newYear",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// A template field consumed by the share flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GiftField {
    Url { name: String, value: String },
    Image { name: String, image: ImageRef },
    Size { name: String, value: u32 },
}

impl GiftField {
    pub fn name(&self) -> &str {
        match self {
            GiftField::Url { name, .. }
            | GiftField::Image { name, .. }
            | GiftField::Size { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GiftRecord {
    pub unique_id: String,
    pub title: String,
    pub template: String,
    pub fields: Json<Vec<GiftField>>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftSpecification {
    pub template: TemplateKind,
    pub title: String,
    #[serde(default)]
    pub fields: Vec<GiftField>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoSpecification {
    pub image_base64: String,
    pub target_area_fraction: f32,
}

/// Rendering options for a gift's QR code. The payload is always the gift's canonical url.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QrSpecification {
    #[serde(default)]
    pub size_px: Option<u32>,
    #[serde(default)]
    pub error_correction_level: EcLevel,
    #[serde(default)]
    pub dark_color: Option<String>,
    #[serde(default)]
    pub light_color: Option<String>,
    #[serde(default)]
    pub margin_modules: Option<u32>,
    #[serde(default)]
    pub logo: Option<LogoSpecification>,
}

impl QrSpecification {
    pub fn to_request(&self, payload: &str) -> QrRequest {
        let defaults = QrRequest::new(payload, self.error_correction_level);
        QrRequest {
            size_px: self.size_px.unwrap_or(defaults.size_px),
            dark_color: self.dark_color.clone().unwrap_or(defaults.dark_color),
            light_color: self.light_color.clone().unwrap_or(defaults.light_color),
            margin_modules: self.margin_modules.unwrap_or(defaults.margin_modules),
            ..defaults
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosterSpecification {
    #[serde(default)]
    pub frame_shape: FrameShape,
    #[serde(default)]
    pub frame_size: Option<u32>,
    #[serde(default)]
    pub photo_base64: Option<String>,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub qr: QrSpecification,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StylizeSpecification {
    pub reference_photo_base64: String,
    #[serde(default = "default_strength")]
    pub strength: f32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,
}

fn default_strength() -> f32 {
    0.5
}

fn default_guidance_scale() -> f32 {
    7.5
}
