// Vision Model Client
//
// Sends one entrance photo to a chat-completions style vision endpoint and
// parses the attribute JSON out of the reply.
// Rate limit: configurable requests/second (governor)

use super::response_parser::parse_reply;
use super::{AttributeExtractor, ExtractionError, ImagePayload};
use crate::config::VisionConfig;
use crate::vocabulary::{Attribute, AttributeKind, AttributeSet, EntranceType, VocabularyVersion};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You assess wheelchair accessibility of building entrances from photos. \
Report only what is visible. Answer with a single JSON object and nothing else.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct VisionClient {
    endpoint: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl VisionClient {
    /// Build a client for `config.endpoint`
    ///
    /// `request_timeout` bounds one HTTP exchange; the pipeline's own
    /// deadline is applied separately by the bounded runner.
    pub fn new(config: &VisionConfig, api_key: String, request_timeout: Duration) -> anyhow::Result<Self> {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = governor::RateLimiter::direct(governor::Quota::per_second(per_second));

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            client,
            rate_limiter,
        })
    }

    /// Check if API key is configured
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn request_body(&self, image: &ImagePayload) -> serde_json::Value {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image.bytes());
        let data_url = format!("data:{};base64,{}", image.mime_type(), encoded);

        json!({
            "model": self.model,
            "max_tokens": 1024,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": build_prompt(self.vocabulary_version()) },
                        { "type": "image_url", "image_url": { "url": data_url } }
                    ]
                }
            ]
        })
    }
}

#[async_trait]
impl AttributeExtractor for VisionClient {
    fn source_id(&self) -> &'static str {
        "vision"
    }

    async fn extract(&self, image: &ImagePayload) -> Result<AttributeSet, ExtractionError> {
        if !self.is_configured() {
            return Err(ExtractionError::ModelUnavailable("vision API key not configured".to_string()));
        }

        // Rate limit API calls
        self.rate_limiter.until_ready().await;

        debug!(
            model = %self.model,
            mime = image.mime_type(),
            bytes = image.len(),
            "Requesting attribute extraction"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(image))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Vision API returned error");
            return Err(map_status(status, &body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::ModelUnavailable(format!("malformed vision API response: {}", e)))?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExtractionError::ModelUnavailable("vision API returned no content".to_string()))?;

        let set = parse_reply(&text, self.vocabulary_version())?;
        debug!(
            attributes = set.values.len(),
            quarantined = set.quarantined.len(),
            "Attribute extraction complete"
        );
        Ok(set)
    }
}

/// Classify a non-success HTTP status
pub fn map_status(status: StatusCode, body: &str) -> ExtractionError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return ExtractionError::ModelUnavailable(format!("vision API returned {}", status));
    }
    if status.is_client_error() && body.to_ascii_lowercase().contains("image") {
        return ExtractionError::Unreadable(format!("vision API rejected image ({})", status));
    }
    ExtractionError::ModelUnavailable(format!("vision API returned {}", status))
}

fn map_transport_error(err: reqwest::Error) -> ExtractionError {
    if err.is_timeout() {
        ExtractionError::ModelUnavailable(format!("vision API request timed out: {}", err))
    } else {
        ExtractionError::ModelUnavailable(format!("vision API request failed: {}", err))
    }
}

/// Instructions describing the vocabulary for `version`
pub fn build_prompt(version: VocabularyVersion) -> String {
    let mut prompt = String::from(
        "Describe the entrance in this photo using exactly these keys. \
         For each key give {\"value\": ..., \"confidence\": 0.0-1.0}; \
         use null as the value when the photo does not show it.\n",
    );

    for attribute in Attribute::ALL.iter().filter(|a| a.defined_in(version)) {
        let domain = match (attribute.kind(), attribute.range()) {
            (AttributeKind::Continuous, Some((min, max))) => format!("number {}..{}", min, max),
            _ if *attribute == Attribute::EntranceType => {
                let names: Vec<&str> = [
                    EntranceType::Level,
                    EntranceType::Stepped,
                    EntranceType::Ramped,
                    EntranceType::Lift,
                    EntranceType::Revolving,
                ]
                .iter()
                .map(EntranceType::as_str)
                .collect();
                format!("one of {}", names.join(", "))
            }
            _ => "true or false".to_string(),
        };
        prompt.push_str(&format!("- {}: {}\n", attribute.key(), domain));
    }

    prompt.push_str(
        "Reply as {\"attributes\": {...}}. If the photo does not show a building \
         entrance, reply {\"unreadable\": \"<reason>\"}.",
    );
    prompt
}
