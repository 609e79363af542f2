//! Metadata extraction: one page image in, [`PageMetadata`] out.
//!
//! The extractor never fails. A rate-limited call is retried with exponential
//! backoff (`retry_backoff_ms * 2^(k-1)` after failed attempt *k*, so 2 s →
//! 4 s → 8 s by default) up to `max_attempts` calls in total. Anything else,
//! whether an auth problem, a timeout, a dropped connection or an answer that
//! is not the expected JSON, ends the page at once with unknown metadata. One
//! unreadable page then simply continues the previous group instead of
//! stopping the batch.

use crate::config::SplitConfig;
use crate::error::InferenceError;
use crate::output::{PageImage, PageMetadata};
use crate::pipeline::encode::to_image_data;
use crate::progress::ProgressCallback;
use crate::prompts::{EXTRACTION_PROMPT, PLACEHOLDER_VALUES};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A vision-capable model that answers a prompt about one page image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Return the model's raw text answer.
    async fn complete(&self, image: &PageImage, prompt: &str) -> Result<String, InferenceError>;
}

/// [`VisionModel`] backed by an `edgequake-llm` provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    json_mode: bool,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &SplitConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            json_mode: config.json_mode,
        }
    }

    fn options(&self) -> CompletionOptions {
        let base = if self.json_mode {
            CompletionOptions::json_mode()
        } else {
            CompletionOptions::default()
        };
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..base
        }
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    async fn complete(&self, image: &PageImage, prompt: &str) -> Result<String, InferenceError> {
        let messages = vec![ChatMessage::user_with_images(
            prompt,
            vec![to_image_data(image)],
        )];
        let options = self.options();

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| InferenceError::classify(e.to_string()))?;

        debug!(
            "Page {}: {} input tokens, {} output tokens",
            image.page_index, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Result of extracting one page, including how it got there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub metadata: PageMetadata,
    /// Calls made to the model, first call included.
    pub attempts: u32,
    /// Rate-limit retries among those calls.
    pub retries: u32,
    /// Why the page degraded to unknown metadata, if it did.
    pub failure: Option<InferenceError>,
}

/// Drives a [`VisionModel`] with the retry policy and parses its answer.
pub struct MetadataExtractor {
    model: Arc<dyn VisionModel>,
    prompt: String,
    max_attempts: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
    progress: Option<ProgressCallback>,
}

impl MetadataExtractor {
    pub fn new(model: Arc<dyn VisionModel>, config: &SplitConfig) -> Self {
        Self {
            model,
            prompt: config
                .extraction_prompt
                .clone()
                .unwrap_or_else(|| EXTRACTION_PROMPT.to_string()),
            max_attempts: config.max_attempts.max(1),
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
            progress: config.progress_callback.clone(),
        }
    }

    /// Extract identifying fields from one page. Never returns an error.
    pub async fn extract(&self, image: &PageImage) -> Extraction {
        let page = image.page_index;
        let mut attempt: u32 = 1;
        let mut retries: u32 = 0;

        loop {
            let outcome = match timeout(
                Duration::from_secs(self.api_timeout_secs),
                self.model.complete(image, &self.prompt),
            )
            .await
            {
                Ok(answer) => answer.and_then(|text| parse_response(page, &text)),
                Err(_) => Err(InferenceError::Timeout {
                    secs: self.api_timeout_secs,
                }),
            };

            match outcome {
                Ok(metadata) => {
                    debug!(
                        "Page {}: invoice={:?} ship_to={:?} (attempt {})",
                        page, metadata.invoice_no, metadata.ship_to, attempt
                    );
                    return Extraction {
                        metadata,
                        attempts: attempt,
                        retries,
                        failure: None,
                    };
                }
                Err(e) if e.is_rate_limit() && attempt < self.max_attempts => {
                    let delay_ms = backoff_delay_ms(self.retry_backoff_ms, attempt);
                    warn!(
                        "Page {}: rate limited on attempt {}/{}, retrying in {}ms",
                        page, attempt, self.max_attempts, delay_ms
                    );
                    if let Some(ref cb) = self.progress {
                        cb.on_extraction_retry(page, attempt, delay_ms);
                    }
                    sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                    retries += 1;
                }
                Err(e) => {
                    warn!("Page {}: extraction failed on attempt {}: {}", page, attempt, e);
                    return Extraction {
                        metadata: PageMetadata::unknown(page),
                        attempts: attempt,
                        retries,
                        failure: Some(e),
                    };
                }
            }
        }
    }
}

/// Backoff after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
pub fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

// ── Response parsing ─────────────────────────────────────────────────────────

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n?(.*?)\n?```\s*$").unwrap());

#[derive(Debug, Deserialize)]
struct RawFields {
    #[serde(default, alias = "invoice_no", alias = "invoiceNumber", alias = "invoice")]
    #[serde(rename = "invoiceNo")]
    invoice_no: Option<Value>,
    #[serde(default, alias = "ship_to", alias = "shipToCompany")]
    #[serde(rename = "shipTo")]
    ship_to: Option<Value>,
}

/// Parse a model answer into page metadata.
///
/// Accepts the bare object, a fenced block, or an object surrounded by prose.
pub fn parse_response(page_index: usize, text: &str) -> Result<PageMetadata, InferenceError> {
    let cleaned = text.replace(['\u{200B}', '\u{FEFF}', '\u{200C}', '\u{200D}', '\u{2060}'], "");
    let trimmed = cleaned.trim();
    let unfenced = match RE_FENCED.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    };

    let object = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => {
            return Err(InferenceError::Malformed(format!(
                "no JSON object in answer: {:.80}",
                unfenced
            )))
        }
    };

    let raw: RawFields =
        serde_json::from_str(object).map_err(|e| InferenceError::Malformed(e.to_string()))?;

    Ok(PageMetadata {
        page_index,
        invoice_no: normalise_field(raw.invoice_no),
        ship_to: normalise_field(raw.ship_to),
    })
}

/// Trim a field and map placeholders and empty strings to `None`.
fn normalise_field(value: Option<Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() || PLACEHOLDER_VALUES.contains(&text.to_ascii_lowercase().as_str()) {
        None
    } else {
        Some(text)
    }
}
