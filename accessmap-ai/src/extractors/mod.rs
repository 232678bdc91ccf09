//! Attribute extraction
//!
//! An [`AttributeExtractor`] turns one entrance photo into a versioned,
//! confidence-scored [`AttributeSet`]. The production implementation calls an
//! external vision model ([`vision_client::VisionClient`]); the pipeline only
//! ever talks to it through [`bounded::BoundedExtractor`], which adds the
//! deadline, the single retry and cancellation.

pub mod bounded;
pub mod response_parser;
pub mod vision_client;

use async_trait::async_trait;
use thiserror::Error;

use crate::vocabulary::{AttributeSet, VocabularyVersion};

pub use bounded::BoundedExtractor;
pub use vision_client::VisionClient;

/// Extraction failures
///
/// None of these ever produce an Observation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    /// Payload is not a decodable image, or the model could not read it
    #[error("Unreadable image: {0}")]
    Unreadable(String),

    /// Inference call failed (network, 5xx, rate limited, misconfigured)
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Inference exceeded its deadline
    #[error("Extraction timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Submitter went away before extraction finished
    #[error("Extraction cancelled")]
    Cancelled,
}

impl ExtractionError {
    /// Stable identifier for logs, events and the failure table
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::Unreadable(_) => "unreadable",
            ExtractionError::ModelUnavailable(_) => "model_unavailable",
            ExtractionError::Timeout { .. } => "timeout",
            ExtractionError::Cancelled => "cancelled",
        }
    }

    /// Transient failures get one more attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExtractionError::ModelUnavailable(_) | ExtractionError::Timeout { .. }
        )
    }
}

/// Validated image bytes with their sniffed MIME type
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    bytes: Vec<u8>,
    mime_type: &'static str,
}

impl ImagePayload {
    /// Validate raw upload bytes by magic number
    ///
    /// Rejects empty payloads, payloads over `max_bytes`, and anything that
    /// does not sniff as an image.
    pub fn sniff(bytes: Vec<u8>, max_bytes: usize) -> Result<Self, ExtractionError> {
        if bytes.is_empty() {
            return Err(ExtractionError::Unreadable("empty image payload".to_string()));
        }
        if bytes.len() > max_bytes {
            return Err(ExtractionError::Unreadable(format!(
                "image is {} bytes, limit is {}",
                bytes.len(),
                max_bytes
            )));
        }

        match infer::get(&bytes) {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {
                let mime_type = kind.mime_type();
                Ok(Self { bytes, mime_type })
            }
            Some(kind) => Err(ExtractionError::Unreadable(format!(
                "payload is {}, not an image",
                kind.mime_type()
            ))),
            None => Err(ExtractionError::Unreadable(
                "payload type could not be recognized".to_string(),
            )),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Extractor trait - every image-to-attributes backend implements this
#[async_trait]
pub trait AttributeExtractor: Send + Sync {
    /// Extractor identifier (e.g., "vision")
    fn source_id(&self) -> &'static str;

    /// Vocabulary version this extractor produces
    fn vocabulary_version(&self) -> VocabularyVersion {
        VocabularyVersion::CURRENT
    }

    /// Extract accessibility attributes from one image
    async fn extract(&self, image: &ImagePayload) -> Result<AttributeSet, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const PDF_HEADER: &[u8] = b"%PDF-1.7\n";

    #[test]
    fn test_sniff_accepts_png() {
        let payload = ImagePayload::sniff(PNG_HEADER.to_vec(), 1024).unwrap();
        assert_eq!(payload.mime_type(), "image/png");
        assert_eq!(payload.len(), PNG_HEADER.len());
    }

    #[test]
    fn test_sniff_rejects_empty() {
        let err = ImagePayload::sniff(Vec::new(), 1024).unwrap_err();
        assert_eq!(err.kind(), "unreadable");
    }

    #[test]
    fn test_sniff_rejects_oversize() {
        let err = ImagePayload::sniff(PNG_HEADER.to_vec(), 4).unwrap_err();
        assert!(matches!(err, ExtractionError::Unreadable(_)));
    }

    #[test]
    fn test_sniff_rejects_non_image() {
        assert!(ImagePayload::sniff(PDF_HEADER.to_vec(), 1024).is_err());
        assert!(ImagePayload::sniff(b"hello world".to_vec(), 1024).is_err());
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ExtractionError::ModelUnavailable("503".into()).is_retryable());
        assert!(ExtractionError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(!ExtractionError::Unreadable("x".into()).is_retryable());
        assert!(!ExtractionError::Cancelled.is_retryable());
    }
}
