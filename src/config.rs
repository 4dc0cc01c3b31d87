use std::env;
use std::path::PathBuf;

use tracing::warn;

use crate::error::StudioError;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_DOWNLOAD_PREFIX: &str = "creaura-generated";

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub gemini_api_base: String,
    pub analysis_model: String,
    pub image_model: String,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub http_timeout_seconds: u64,
    pub output_dir: PathBuf,
    pub download_prefix: String,
}

fn lookup_string<F>(lookup: &F, name: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn lookup_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => match value.trim().parse::<u64>() {
            Ok(parsed) if parsed > 0 => parsed,
            _ => {
                warn!("Invalid {} value '{}'; using {}.", name, value, default);
                default
            }
        },
        None => default,
    }
}

impl Config {
    pub fn load() -> Result<Self, StudioError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, StudioError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let Some(gemini_api_key) = present("GEMINI_API_KEY").or_else(|| present("API_KEY")) else {
            return Err(StudioError::Configuration(
                "GEMINI_API_KEY (or API_KEY) environment variable is not set".to_string(),
            ));
        };

        let gemini_api_base = lookup_string(&lookup, "GEMINI_API_BASE", DEFAULT_GEMINI_API_BASE)
            .trim_end_matches('/')
            .to_string();

        Ok(Config {
            gemini_api_key,
            gemini_api_base,
            analysis_model: lookup_string(&lookup, "GEMINI_ANALYSIS_MODEL", DEFAULT_ANALYSIS_MODEL),
            image_model: lookup_string(&lookup, "GEMINI_IMAGE_MODEL", DEFAULT_IMAGE_MODEL),
            log_level: lookup_string(&lookup, "LOG_LEVEL", "info"),
            log_dir: PathBuf::from(lookup_string(&lookup, "LOG_DIR", "logs")),
            http_timeout_seconds: lookup_u64(&lookup, "HTTP_TIMEOUT_SECONDS", 120),
            output_dir: PathBuf::from(lookup_string(&lookup, "OUTPUT_DIR", ".")),
            download_prefix: lookup_string(&lookup, "DOWNLOAD_PREFIX", DEFAULT_DOWNLOAD_PREFIX),
        })
    }

    #[cfg(test)]
    pub fn for_tests(api_base: &str) -> Self {
        let api_base = api_base.to_string();
        Self::from_lookup(move |name| match name {
            "GEMINI_API_KEY" => Some("test-key".to_string()),
            "GEMINI_API_BASE" => Some(api_base.clone()),
            _ => None,
        })
        .expect("test config")
    }
}
