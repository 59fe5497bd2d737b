//! Uploaded deck constraints and the extracted slide model.
//!
//! Upload preconditions (extension, size) are checked before a job record is
//! created; the slide-count bound is checked right after extraction, before
//! any inference spend.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;

/// Accepted deck file extensions
pub const ALLOWED_EXTENSIONS: [&str; 2] = ["ppt", "pptx"];

/// Maximum accepted upload size (50 MB)
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Inclusive bounds on the extracted slide count
pub const MIN_SLIDES: usize = 5;
pub const MAX_SLIDES: usize = 20;

/// One slide of extracted deck text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slide {
    /// 1-based position in the deck
    pub index: usize,

    /// Visible slide text (including any OCR output the extractor produced)
    #[serde(default)]
    pub text: String,

    /// Speaker notes, when present
    #[serde(default)]
    pub notes: Option<String>,
}

/// Validate the upload preconditions for a deck file name and size
pub fn validate_upload(original_name: &str, size_bytes: u64) -> Result<(), PipelineError> {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext) => {}
        _ => {
            return Err(PipelineError::Validation(format!(
                "only .ppt and .pptx files are accepted, got '{}'",
                original_name
            )))
        }
    }

    if size_bytes > MAX_UPLOAD_BYTES {
        return Err(PipelineError::Validation(format!(
            "file is {} bytes, maximum is {} bytes",
            size_bytes, MAX_UPLOAD_BYTES
        )));
    }

    Ok(())
}

/// Validate the extracted slide count against the [MIN_SLIDES, MAX_SLIDES] bound
pub fn validate_slide_count(slides: &[Slide]) -> Result<(), PipelineError> {
    let count = slides.len();
    if !(MIN_SLIDES..=MAX_SLIDES).contains(&count) {
        return Err(PipelineError::Validation(format!(
            "invalid slide count: {}. Must be {}-{}",
            count, MIN_SLIDES, MAX_SLIDES
        )));
    }
    Ok(())
}

/// Replace anything outside [A-Za-z0-9.-_] so the name is safe as a storage key
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Derive the deck's object-storage key from its content and original name.
///
/// Content-addressed prefix (first 8 bytes of SHA-256, hex) so re-uploads of
/// the same bytes collide on the same key.
pub fn derive_source_key(original_name: &str, content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();

    format!(
        "decks/{}-{}",
        hex::encode(&digest[..8]),
        sanitize_file_name(original_name)
    )
}
