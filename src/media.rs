use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use crate::error::StudioError;

pub const SUPPORTED_UPLOAD_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn normalize_image_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        _ => lowered,
    }
}

pub fn mime_for_path(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime_type = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" | "jfif" => "image/jpeg",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime_type.to_string())
}

pub fn is_supported_upload_mime(mime_type: &str) -> bool {
    let normalized = normalize_image_mime_type(mime_type);
    SUPPORTED_UPLOAD_MIME_TYPES.contains(&normalized.as_str())
}

/// Reads the whole file and returns its bytes as standard (padded) base64.
pub async fn encode_file(path: &Path) -> Result<String, StudioError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| StudioError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Encoded {} ({} bytes)", path.display(), bytes.len());
    Ok(general_purpose::STANDARD.encode(&bytes))
}

#[derive(Debug, Default)]
struct PreviewSlots {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Url>>,
}

/// Hands out display handles for uploaded files and tracks which are still alive.
#[derive(Debug, Clone, Default)]
pub struct PreviewRegistry {
    slots: Arc<PreviewSlots>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, path: &Path) -> Result<PreviewHandle, StudioError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|source| StudioError::Io {
                    path: path.to_path_buf(),
                    source,
                })?
                .join(path)
        };
        let uri = Url::from_file_path(&absolute).map_err(|_| {
            StudioError::Validation(format!(
                "Cannot build a preview for {}",
                absolute.display()
            ))
        })?;

        let id = self.slots.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.live.lock().insert(id, uri.clone());
        Ok(PreviewHandle {
            id,
            uri,
            slots: Arc::clone(&self.slots),
        })
    }

    pub fn live_count(&self) -> usize {
        self.slots.live.lock().len()
    }
}

/// Released from its registry when dropped.
#[derive(Debug)]
pub struct PreviewHandle {
    id: u64,
    uri: Url,
    slots: Arc<PreviewSlots>,
}

impl PreviewHandle {
    pub fn uri(&self) -> &Url {
        &self.uri
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        if self.slots.live.lock().remove(&self.id).is_some() {
            debug!("Released preview {}", self.uri);
        }
    }
}

#[derive(Debug)]
pub struct UploadedImage {
    pub path: PathBuf,
    pub mime_type: String,
    preview: PreviewHandle,
}

impl UploadedImage {
    /// Accepts PNG, JPEG and WEBP files, judged by extension.
    pub fn from_path(path: impl Into<PathBuf>, previews: &PreviewRegistry) -> Result<Self, StudioError> {
        let path = path.into();
        let mime_type = mime_for_path(&path)
            .map(|value| normalize_image_mime_type(&value))
            .filter(|value| is_supported_upload_mime(value))
            .ok_or_else(|| {
                StudioError::Validation(format!(
                    "Unsupported image type for {}. Use PNG, JPG or WEBP.",
                    path.display()
                ))
            })?;
        let preview = previews.create(&path)?;
        Ok(Self {
            path,
            mime_type,
            preview,
        })
    }

    pub fn preview_uri(&self) -> &Url {
        self.preview.uri()
    }
}
