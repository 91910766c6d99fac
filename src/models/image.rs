use crate::error::{EngineError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

const SUPPORTED_MIME_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/jpg", "image/webp"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    /// Always a data URI.
    pub src: String,
}

impl GeneratedImage {
    pub fn new(id: impl Into<String>, payload: &str) -> Self {
        Self {
            id: id.into(),
            src: ensure_data_uri(payload),
        }
    }

    /// Builds ids as `<prefix>-<millis>-<index>`, one per payload, in order.
    pub fn batch(prefix: &str, payloads: &[String]) -> Vec<GeneratedImage> {
        let stamp = chrono::Utc::now().timestamp_millis();
        payloads
            .iter()
            .enumerate()
            .map(|(index, payload)| GeneratedImage::new(format!("{}-{}-{}", prefix, stamp, index), payload))
            .collect()
    }
}

/// Returns the payload after the first comma, or the input when there is none.
pub fn strip_data_uri(value: &str) -> &str {
    match value.split_once(',') {
        Some((_, payload)) => payload,
        None => value,
    }
}

pub fn ensure_data_uri(image: &str) -> String {
    if image.starts_with("data:image") {
        image.to_string()
    } else {
        format!("{}{}", PNG_DATA_URI_PREFIX, image)
    }
}

/// A parsed `data:<mime>;base64,<payload>` image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub data: String,
}

impl DataUri {
    pub fn png(data: impl Into<String>) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            data: data.into(),
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || EngineError::Request("Invalid image data URL".into());

        let rest = value.strip_prefix("data:").ok_or_else(invalid)?;
        let (mime_type, data) = rest.split_once(";base64,").ok_or_else(invalid)?;

        if !SUPPORTED_MIME_TYPES.contains(&mime_type) {
            return Err(invalid());
        }
        let valid_alphabet = data
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=');
        if data.is_empty() || !valid_alphabet {
            return Err(invalid());
        }

        Ok(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| EngineError::Request(format!("Invalid base64 image payload: {}", e)))
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.data)
    }
}
