//! Stub extractors standing in for the vision model

use accessmap_ai::extractors::{AttributeExtractor, ExtractionError, ImagePayload};
use accessmap_ai::vocabulary::{Attribute, AttributeSet, AttributeValue, VocabularyVersion};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Replays queued results, then repeats the fallback
pub struct StubExtractor {
    queue: Mutex<VecDeque<Result<AttributeSet, ExtractionError>>>,
    fallback: Result<AttributeSet, ExtractionError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubExtractor {
    pub fn always(result: Result<AttributeSet, ExtractionError>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: result,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn sequence(results: Vec<Result<AttributeSet, ExtractionError>>) -> Self {
        Self {
            queue: Mutex::new(results.into()),
            ..Self::always(Err(ExtractionError::ModelUnavailable("script exhausted".into())))
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttributeExtractor for StubExtractor {
    fn source_id(&self) -> &'static str {
        "stub"
    }

    async fn extract(&self, _image: &ImagePayload) -> Result<AttributeSet, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.queue.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Attribute set with one boolean attribute
pub fn flag_set(attribute: Attribute, value: bool, confidence: f64) -> AttributeSet {
    AttributeSet::new(VocabularyVersion::CURRENT)
        .with(attribute, AttributeValue::Flag(value), confidence)
        .unwrap()
}

/// Minimal bytes that sniff as PNG; `salt` varies the content hash
pub fn png_bytes(salt: u8) -> Vec<u8> {
    vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, salt]
}

/// Minimal bytes that sniff as JPEG
pub fn jpeg_bytes() -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00]
}
