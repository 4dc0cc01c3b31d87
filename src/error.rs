use std::path::PathBuf;

pub const INVALID_API_KEY_MESSAGE: &str = "Invalid API Key. Please check your configuration.";
pub const EMPTY_RESULT_MESSAGE: &str = "The API did not return an image. Please try again.";
pub const MISSING_INPUTS_MESSAGE: &str =
    "Please upload both images and wait for the style analysis to complete.";
pub const BUSY_MESSAGE: &str = "Please wait for the current operation to finish.";

/// Every failure a session can surface. The `Display` text is what the user sees.
#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("{}", INVALID_API_KEY_MESSAGE)]
    Authentication,
    #[error("{0}")]
    Service(String),
    #[error("{}", EMPTY_RESULT_MESSAGE)]
    EmptyResult,
    #[error("{0}")]
    Validation(String),
    #[error("Failed to read image file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StudioError {
    pub fn kind(&self) -> &'static str {
        match self {
            StudioError::Configuration(_) => "configuration",
            StudioError::Authentication => "authentication",
            StudioError::Service(_) => "service",
            StudioError::EmptyResult => "empty_result",
            StudioError::Validation(_) => "validation",
            StudioError::Io { .. } => "io",
        }
    }
}
