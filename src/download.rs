use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use tracing::info;

use crate::error::StudioError;
use crate::media::{detect_mime_type, normalize_image_mime_type};

const DEFAULT_EXTENSION: &str = "png";

#[derive(Debug, Clone)]
pub enum DownloadPayload {
    DataUri(String),
    #[allow(dead_code)]
    Bytes(Vec<u8>),
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    match normalize_image_mime_type(mime_type).as_str() {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => DEFAULT_EXTENSION,
    }
}

/// Splits `data:<mime>;base64,<payload>` into its MIME type and decoded bytes.
pub fn parse_data_uri(uri: &str) -> Result<(String, Vec<u8>), StudioError> {
    let invalid = || StudioError::Validation("Not a base64 data URI".to_string());
    let rest = uri.trim().strip_prefix("data:").ok_or_else(invalid)?;
    let (header, payload) = rest.split_once(',').ok_or_else(invalid)?;
    let mime_type = header.strip_suffix(";base64").ok_or_else(invalid)?;
    let bytes = general_purpose::STANDARD
        .decode(payload)
        .map_err(|err| StudioError::Validation(format!("Data URI payload is not base64: {err}")))?;
    let mime_type = if mime_type.is_empty() {
        format!("image/{DEFAULT_EXTENSION}")
    } else {
        mime_type.to_string()
    };
    Ok((mime_type, bytes))
}

pub fn download_filename(prefix: &str, id: i64, extension: &str) -> String {
    format!("{prefix}-{id}.{extension}")
}

impl DownloadPayload {
    fn into_parts(self) -> Result<(&'static str, Vec<u8>), StudioError> {
        match self {
            DownloadPayload::DataUri(uri) => {
                let (mime_type, bytes) = parse_data_uri(&uri)?;
                Ok((extension_for_mime(&mime_type), bytes))
            }
            DownloadPayload::Bytes(bytes) => {
                let extension = detect_mime_type(&bytes)
                    .map(|mime_type| extension_for_mime(&mime_type))
                    .unwrap_or(DEFAULT_EXTENSION);
                Ok((extension, bytes))
            }
        }
    }
}

/// Writes the payload to `<dir>/<prefix>-<id>.<ext>` and returns the path.
pub async fn save_download(
    dir: &Path,
    prefix: &str,
    id: i64,
    payload: DownloadPayload,
) -> Result<PathBuf, StudioError> {
    let (extension, bytes) = payload.into_parts()?;
    let path = dir.join(download_filename(prefix, id, extension));
    let io_error = |source: std::io::Error| StudioError::Io {
        path: path.clone(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(io_error)?;
    tokio::fs::write(&path, &bytes).await.map_err(io_error)?;
    info!("Saved {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}
