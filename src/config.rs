use crate::qr::validate_payload;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_address: String,
    /// Origin gift urls are built from, e.g. `https://gifts.example.com`.
    pub public_origin: String,
    pub encrypted_api_key: String,
    pub style_blender_url: Option<String>,
    pub style_blender_token: Option<String>,
    pub poster_font_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| format!("Environment variable {name} is required"))
        };
        let optional = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let public_origin = required("PUBLIC_ORIGIN")?
            .trim_end_matches('/')
            .to_string();
        validate_payload(&public_origin)
            .map_err(|err| format!("PUBLIC_ORIGIN is not a valid origin: {err}"))?;

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            server_address: required("SERVER_ADDRESS")?,
            public_origin,
            encrypted_api_key: required("ENCRYPTED_API_KEY")?.to_lowercase(),
            style_blender_url: optional("STYLE_BLENDER_URL"),
            style_blender_token: optional("STYLE_BLENDER_TOKEN"),
            poster_font_path: optional("POSTER_FONT_PATH").map(PathBuf::from),
        })
    }
}
