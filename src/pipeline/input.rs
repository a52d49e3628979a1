// Image input sources: filesystem paths and base64 payloads
use crate::error::{LesionError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use std::path::{Path, PathBuf};

const DATA_URL_PATTERN: &str = r"^data:image/([A-Za-z0-9.+-]+);base64,";

/// Raw image bytes plus where they came from
#[derive(Debug, Clone)]
pub struct ImageInput {
    bytes: Vec<u8>,
    source_path: Option<PathBuf>,
    extension: String,
}

impl ImageInput {
    pub fn from_bytes(bytes: Vec<u8>, source_path: Option<PathBuf>) -> Self {
        let extension = source_path
            .as_deref()
            .and_then(Path::extension)
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| Self::sniff_extension(&bytes));

        Self {
            bytes,
            source_path,
            extension,
        }
    }

    /// Read an image file; a missing or unreadable file is an image error
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LesionError::ImageDecode {
                reason: format!("image not found: {}", path.display()),
            });
        }
        let bytes = std::fs::read(path).map_err(|e| LesionError::ImageDecode {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        Ok(Self::from_bytes(bytes, Some(path.to_path_buf())))
    }

    /// Decode a base64 payload, with or without a `data:image/...;base64,` prefix
    pub fn from_base64(payload: &str) -> Result<Self> {
        let pattern = Regex::new(DATA_URL_PATTERN).map_err(|e| LesionError::Other(e.into()))?;
        let payload = payload.trim();

        let (body, declared) = match pattern.captures(payload) {
            Some(captures) => {
                let prefix_len = captures.get(0).map_or(0, |m| m.end());
                let subtype = captures.get(1).map(|m| m.as_str().to_ascii_lowercase());
                (&payload[prefix_len..], subtype)
            }
            None => (payload, None),
        };

        let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| LesionError::ImageDecode {
                reason: format!("invalid base64 image: {}", e),
            })?;
        if bytes.is_empty() {
            return Err(LesionError::ImageDecode {
                reason: "base64 payload is empty".to_string(),
            });
        }

        let mut input = Self::from_bytes(bytes, None);
        if let Some(subtype) = declared {
            input.extension = match subtype.as_str() {
                "jpeg" => "jpg".to_string(),
                other => other.to_string(),
            };
        }
        Ok(input)
    }

    fn sniff_extension(bytes: &[u8]) -> String {
        image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("png")
            .to_string()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Human-readable origin for logs and audit records
    pub fn describe(&self) -> String {
        match &self.source_path {
            Some(path) => path.display().to_string(),
            None => format!("<base64, {} bytes>", self.bytes.len()),
        }
    }
}
