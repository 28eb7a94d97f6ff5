//! Analysis Client for the Gemini `generateContent` endpoint.
//!
//! One request carries the whole batch: the instruction text with every
//! snapshot embedded, plus the response schema as a generation constraint.
//! The endpoint is expected to honor the schema, but the returned text is
//! still parsed and validated here before anything is trusted.
//!
//! # Retry Strategy
//!
//! Every failure of a single attempt is treated as transient:
//!
//! - transport error or non-2xx status
//! - no candidates (including a content-safety block)
//! - candidate text that is not a JSON array of valid assessments
//!
//! Up to `max_retries` retries follow the first attempt, each after an
//! exponential backoff of `initial_backoff_ms × 2^(retry − 1)`
//! (1 s, 2 s, 4 s with the defaults). When all attempts fail the whole
//! batch fails; there is no partial result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

use novel_lens_core::models::{Assessment, NovelSnapshot};
use novel_lens_core::prompt::build_prompt;
use novel_lens_core::schema::response_schema;

use crate::config::GeminiConfig;

/// Harm categories whose blocking threshold is lifted for every request.
pub const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no snapshots to analyze")]
    EmptyBatch,

    #[error("failed to build request: {0}")]
    Request(String),

    #[error("API request failed: {0}")]
    Transport(String),

    #[error("Gemini block reason: {0}")]
    Blocked(String),

    #[error("Gemini API returned no candidates")]
    NoCandidates,

    #[error("failed to parse response: {0}")]
    Malformed(String),

    #[error("Gemini API failed after {retries} retries. Last error: {last}")]
    Exhausted {
        retries: u32,
        #[source]
        last: Box<AnalysisError>,
    },
}

/// Sends one `generateContent` request and returns the raw response body.
#[async_trait]
pub trait GenerativeTransport: Send + Sync {
    async fn generate(&self, model: &str, api_key: &str, body: &Value) -> Result<String, AnalysisError>;
}

/// `reqwest` transport: `POST {base}/v1beta/models/{model}:generateContent?key=…`
pub struct GeminiTransport {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiTransport {
    pub fn new(config: &GeminiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GenerativeTransport for GeminiTransport {
    async fn generate(&self, model: &str, api_key: &str, body: &Value) -> Result<String, AnalysisError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        debug!(url = %url, "sending Gemini request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AnalysisError::Transport(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(AnalysisError::Transport(format!("HTTP {}: {}", status, text)));
        }
        Ok(text)
    }
}

/// Build the full request body for a batch.
pub fn build_request(snapshots: &[NovelSnapshot], temperature: f64) -> Result<Value, AnalysisError> {
    let prompt = build_prompt(snapshots).map_err(|e| AnalysisError::Request(e.to_string()))?;
    let safety: Vec<Value> = HARM_CATEGORIES
        .iter()
        .map(|c| json!({ "category": c, "threshold": "BLOCK_NONE" }))
        .collect();

    Ok(json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseJsonSchema": response_schema(),
            "temperature": temperature,
        },
        "safetySettings": safety,
    }))
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<Value>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Parse a raw `generateContent` body into assessments.
///
/// The first candidate's first text part holds the model's JSON array and
/// is parsed a second time into [`Assessment`]s, which enforces the enum
/// constraints on the verdict and every category.
pub fn parse_response(body: &str) -> Result<Vec<Assessment>, AnalysisError> {
    let response: GenerateResponse =
        serde_json::from_str(body).map_err(|e| AnalysisError::Malformed(e.to_string()))?;

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(match response.prompt_feedback {
            Some(feedback) => AnalysisError::Blocked(feedback.to_string()),
            None => AnalysisError::NoCandidates,
        });
    };

    let text = candidate
        .content
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or_else(|| AnalysisError::Malformed("candidate has no text part".into()))?;

    serde_json::from_str::<Vec<Assessment>>(&text).map_err(|e| AnalysisError::Malformed(e.to_string()))
}

pub struct AnalysisClient {
    transport: Arc<dyn GenerativeTransport>,
    config: GeminiConfig,
}

impl AnalysisClient {
    pub fn new(transport: Arc<dyn GenerativeTransport>, config: GeminiConfig) -> Self {
        Self { transport, config }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << (retry.saturating_sub(1)).min(16);
        Duration::from_millis(self.config.initial_backoff_ms.saturating_mul(factor))
    }

    /// Analyze a non-empty batch. `result[i]` corresponds to `snapshots[i]`;
    /// the caller checks that the lengths agree.
    pub async fn analyze(
        &self,
        snapshots: &[NovelSnapshot],
        api_key: &str,
        model: &str,
    ) -> Result<Vec<Assessment>, AnalysisError> {
        if snapshots.is_empty() {
            return Err(AnalysisError::EmptyBatch);
        }

        let body = build_request(snapshots, self.config.temperature)?;
        debug!(novels = snapshots.len(), model, "requesting Gemini analysis");

        let mut last_err: Option<AnalysisError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                let reason = last_err.as_ref().map(ToString::to_string).unwrap_or_default();
                warn!(
                    attempt,
                    max_retries = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "retrying Gemini request"
                );
                tokio::time::sleep(delay).await;
            }

            let outcome = match self.transport.generate(model, api_key, &body).await {
                Ok(text) => parse_response(&text),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(analyses) => {
                    debug!(count = analyses.len(), attempt, "Gemini analysis succeeded");
                    return Ok(analyses);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Gemini attempt failed");
                    last_err = Some(e);
                }
            }
        }

        let last = last_err.unwrap_or(AnalysisError::NoCandidates);
        error!(retries = self.config.max_retries, error = %last, "Gemini analysis failed");
        Err(AnalysisError::Exhausted {
            retries: self.config.max_retries,
            last: Box::new(last),
        })
    }
}
