//! Consensus correction: one best textual version per cluster.
//!
//! Multi-member clusters are sent to an external correction capability that
//! picks and cleans the best variant. A failed call falls back to the
//! cluster seed at reduced confidence; it is a local recovery, never fatal.
//! Singleton clusters skip the external call entirely and only get the
//! cheap significance filter.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::TextCluster;

/// Confidence attached to a successfully corrected cluster.
pub const CONFIDENCE_CORRECTED: f32 = 0.95;

/// Confidence attached to the seed text when correction fails.
pub const CONFIDENCE_FALLBACK: f32 = 0.8;

/// Confidence attached to a singleton cluster's text.
pub const CONFIDENCE_SINGLETON: f32 = 0.7;

/// Singleton detections at or below this trimmed length are flagged as
/// likely noise, kept in the output but marked non-significant.
pub const SIGNIFICANT_MIN_CHARS: usize = 3;

#[derive(Error, Debug)]
pub enum CorrectionError {
    #[error("Correction service is not configured — set CORRECTION_API_KEY to enable it")]
    NotConfigured,

    #[error("Correction service is not reachable at {0}")]
    NotReachable(String),

    #[error("Correction service returned an error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Correction request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Correction response could not be parsed: {0}")]
    ResponseParsing(String),

    #[error("Correction response was empty")]
    EmptyResponse,

    #[error("Network error: {0}")]
    Network(String),
}

/// External correction capability: several noisy variants of one sentence
/// in, a single cleaned string out. Stateless per call; `Send + Sync` so
/// callers may invoke it concurrently across clusters.
pub trait CorrectionClient: Send + Sync {
    fn correct(&self, texts: &[String]) -> Result<String, CorrectionError>;
}

/// How a cluster was resolved into final text. The source frame is attached
/// later by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResolution {
    pub text: String,
    pub corrected: bool,
    pub confidence: f32,
    /// Full member list, present only when the text came back corrected.
    pub original_texts: Option<Vec<String>>,
    pub is_significant: bool,
}

/// Resolve one cluster into its final text.
pub fn resolve_cluster(
    cluster: &TextCluster,
    client: Option<&dyn CorrectionClient>,
) -> ClusterResolution {
    let seed_text = cluster
        .seed()
        .map(|d| d.text.clone())
        .unwrap_or_default();

    if cluster.len() < 2 {
        let is_significant = seed_text.trim().chars().count() > SIGNIFICANT_MIN_CHARS;
        return ClusterResolution {
            text: seed_text,
            corrected: false,
            confidence: CONFIDENCE_SINGLETON,
            original_texts: None,
            is_significant,
        };
    }

    let members = cluster.member_texts();
    let corrected = client.and_then(|client| match client.correct(&members) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(
                members = members.len(),
                error = %e,
                "Correction failed, falling back to the cluster seed"
            );
            None
        }
    });

    match corrected {
        Some(text) => ClusterResolution {
            text,
            corrected: true,
            confidence: CONFIDENCE_CORRECTED,
            original_texts: Some(members),
            is_significant: true,
        },
        None => ClusterResolution {
            text: seed_text,
            corrected: false,
            confidence: CONFIDENCE_FALLBACK,
            original_texts: None,
            is_significant: true,
        },
    }
}

// ──────────────────────────────────────────────
// ChatCorrectionClient
// ──────────────────────────────────────────────

const CORRECTION_SYSTEM_PROMPT: &str = "\
You analyze text fragments produced by OCR. The fragments you receive are \
noisy variants of the same sentence. Identify the most complete and correct \
version, fix obvious recognition mistakes, and preserve accents and other \
language-specific characters. Reply with the corrected text only.";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Production correction client: an OpenAI-compatible chat completions
/// endpoint, keyed from the environment.
pub struct ChatCorrectionClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl ChatCorrectionClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        }
    }

    /// Client configured from `CORRECTION_API_KEY`, `CORRECTION_BASE_URL`,
    /// and `CORRECTION_MODEL`. Returns `None` without a key; the pipeline
    /// then runs with correction disabled rather than failing.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("CORRECTION_API_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let base_url = std::env::var("CORRECTION_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model =
            std::env::var("CORRECTION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Some(Self::new(&base_url, &api_key, &model, 60))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl CorrectionClient for ChatCorrectionClient {
    fn correct(&self, texts: &[String]) -> Result<String, CorrectionError> {
        if self.api_key.is_empty() {
            return Err(CorrectionError::NotConfigured);
        }

        let joined = texts.join("\n---\n");
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: CORRECTION_SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &joined,
                },
            ],
            // Low temperature: the task is selection and cleanup, not
            // generation.
            temperature: 0.1,
            max_tokens: 500,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    CorrectionError::NotReachable(self.base_url.clone())
                } else if e.is_timeout() {
                    CorrectionError::Timeout(self.timeout_secs)
                } else {
                    CorrectionError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(CorrectionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| CorrectionError::ResponseParsing(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(CorrectionError::EmptyResponse);
        }
        Ok(content)
    }
}

// ──────────────────────────────────────────────
// MockCorrectionClient (testing)
// ──────────────────────────────────────────────

/// Mock correction client: returns a fixed response or always fails, and
/// counts calls.
pub struct MockCorrectionClient {
    response: Option<String>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockCorrectionClient {
    pub fn returning(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl CorrectionClient for MockCorrectionClient {
    fn correct(&self, _texts: &[String]) -> Result<String, CorrectionError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match &self.response {
            Some(response) => Ok(response.clone()),
            None => Err(CorrectionError::Api {
                status: 503,
                message: "mock correction failure".to_string(),
            }),
        }
    }
}
