//! Deadline, retry and cancellation around an [`AttributeExtractor`]

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AttributeExtractor, ExtractionError, ImagePayload};
use crate::config::PipelineConfig;
use crate::vocabulary::AttributeSet;

/// Runs an extractor with a per-attempt timeout and at most one retry
///
/// Only `ModelUnavailable` and `Timeout` are retried. Cancellation wins over
/// everything, including the retry backoff.
#[derive(Clone)]
pub struct BoundedExtractor {
    inner: Arc<dyn AttributeExtractor>,
    timeout: Duration,
    retry_backoff: Duration,
}

impl BoundedExtractor {
    pub fn new(inner: Arc<dyn AttributeExtractor>, timeout: Duration, retry_backoff: Duration) -> Self {
        Self {
            inner,
            timeout,
            retry_backoff,
        }
    }

    pub fn from_config(inner: Arc<dyn AttributeExtractor>, config: &PipelineConfig) -> Self {
        Self::new(inner, config.extraction_timeout(), config.extraction_retry_backoff())
    }

    pub fn source_id(&self) -> &'static str {
        self.inner.source_id()
    }

    pub async fn run(
        &self,
        image: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<AttributeSet, ExtractionError> {
        let start = Instant::now();

        let first = self.attempt(image, cancel).await;
        let err = match first {
            Ok(set) => return Ok(set),
            Err(err) if err.is_retryable() => err,
            Err(err) => return Err(err),
        };

        warn!(
            source = self.inner.source_id(),
            error = %err,
            backoff_ms = self.retry_backoff.as_millis() as u64,
            "Extraction failed, retrying once"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(ExtractionError::Cancelled),
            _ = tokio::time::sleep(self.retry_backoff) => {}
        }

        let result = self.attempt(image, cancel).await;
        debug!(
            source = self.inner.source_id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Extraction retry finished"
        );
        result
    }

    async fn attempt(
        &self,
        image: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<AttributeSet, ExtractionError> {
        if cancel.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let timeout_ms = self.timeout.as_millis() as u64;
        tokio::select! {
            _ = cancel.cancelled() => Err(ExtractionError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, self.inner.extract(image)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ExtractionError::Timeout { timeout_ms }),
                }
            }
        }
    }
}
