pub mod gemini;
pub mod prompts;

use async_trait::async_trait;

use crate::error::StudioError;

pub use gemini::GeminiClient;

/// Turns a reference image into a free-text style description.
#[async_trait]
pub trait StyleAnalyzer: Send + Sync {
    async fn analyze_style(&self, image_base64: &str, mime_type: &str)
        -> Result<String, StudioError>;
}

/// Re-renders a user image in a described style. `Ok(None)` means the model answered without an image.
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        image_base64: &str,
        mime_type: &str,
        style_description: &str,
    ) -> Result<Option<String>, StudioError>;
}
