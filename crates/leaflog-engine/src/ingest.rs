//! Turns a user-supplied image into a base64 payload the analyzers accept.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::error::IngestError;

/// MIME type plus base64 data, serialized as `{ mimeType, data }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: String,
}

impl ImagePayload {
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode(&self) -> Result<Vec<u8>, IngestError> {
        BASE64
            .decode(self.data.as_bytes())
            .map_err(|err| IngestError::InvalidFormat(format!("payload is not base64: {err}")))
    }

    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/bmp" => "bmp",
            "image/tiff" => "tiff",
            _ => "img",
        }
    }
}

pub fn read_image(path: &Path) -> Result<ImagePayload, IngestError> {
    let bytes = fs::read(path).map_err(|source| IngestError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    encode_image(&bytes, mime_for_path(path))
}

/// Encodes raw bytes as a data URI and splits it back into its parts. The
/// MIME type is sniffed from the bytes first, then taken from `mime_hint`.
pub fn encode_image(bytes: &[u8], mime_hint: Option<&str>) -> Result<ImagePayload, IngestError> {
    let mime_type = sniff_mime(bytes).or(mime_hint).unwrap_or_default();
    let data_url = format!("data:{mime_type};base64,{}", BASE64.encode(bytes));
    split_data_url(&data_url)
}

pub fn split_data_url(data_url: &str) -> Result<ImagePayload, IngestError> {
    let Some((header, data)) = data_url.split_once(";base64,") else {
        return Err(IngestError::InvalidFormat(
            "data URI has no base64 marker".to_string(),
        ));
    };
    let mime_type = header.split(':').nth(1).unwrap_or_default();
    if mime_type.is_empty() {
        return Err(IngestError::InvalidFormat(
            "unsupported or unrecognised image type".to_string(),
        ));
    }
    if data.is_empty() {
        return Err(IngestError::InvalidFormat("image is empty".to_string()));
    }
    Ok(ImagePayload {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}
