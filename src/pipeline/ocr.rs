//! OCR capability boundary.
//!
//! The pipeline never runs a recognition model itself: it hands a prepared
//! bitmap plus pass-through tunables to an engine behind the `OcrEngine`
//! trait and gets back zero or more text fragments. The production engine is
//! an HTTP client to an OCR sidecar service; the mock serves tests.

use std::io::Cursor;

use base64::Engine as _;
use image::{DynamicImage, GenericImageView, ImageFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How much structure the engine should return per fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailMode {
    /// Fragments only, no geometry or per-fragment confidence.
    TextOnly,
    /// Fragments with bounding geometry and confidence.
    WithGeometry,
}

/// Detection and recognition tunables, passed through to the engine
/// unchanged. The pipeline computes none of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOptions {
    pub detail: DetailMode,
    /// Group fragments into paragraphs engine-side.
    pub paragraph: bool,
    pub batch_size: u32,
    /// Minimum text height in pixels.
    pub min_size: u32,
    pub text_threshold: f32,
    pub link_threshold: f32,
    pub low_text: f32,
    pub canvas_size: u32,
}

impl OcrOptions {
    /// Mode-dependent defaults: bigger batches and canvas when an
    /// accelerator is available.
    pub fn for_mode(accelerated: bool) -> Self {
        Self {
            detail: DetailMode::TextOnly,
            paragraph: true,
            batch_size: if accelerated { 8 } else { 1 },
            min_size: 10,
            text_threshold: 0.6,
            link_threshold: 0.3,
            low_text: 0.3,
            canvas_size: if accelerated { 2048 } else { 1024 },
        }
    }
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR service is not reachable at {0}")]
    NotReachable(String),

    #[error("OCR service returned an error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("OCR request timed out after {0} seconds")]
    Timeout(u64),

    #[error("OCR response could not be parsed: {0}")]
    ResponseParsing(String),

    #[error("Image could not be encoded for transport: {0}")]
    ImageEncoding(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// External OCR capability: given a bitmap, return recognized fragments.
pub trait OcrEngine: Send {
    fn detect(&self, image: &DynamicImage, options: &OcrOptions) -> Result<Vec<String>, OcrError>;
}

/// Builds one engine per extraction worker. Each worker calls the factory
/// once and owns the result exclusively for its lifetime.
pub type OcrEngineFactory = dyn Fn() -> Result<Box<dyn OcrEngine>, OcrError> + Send + Sync;

// ──────────────────────────────────────────────
// RemoteOcrEngine
// ──────────────────────────────────────────────

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: String,
    use_gpu: bool,
    options: &'a OcrOptions,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    texts: Vec<String>,
}

/// Production engine: HTTP client to an OCR sidecar service.
///
/// Cheap to construct, so every worker gets its own instance and no handle
/// is ever shared across threads.
pub struct RemoteOcrEngine {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
    accelerated: bool,
}

impl RemoteOcrEngine {
    pub fn new(base_url: &str, timeout_secs: u64, accelerated: bool) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
            accelerated,
        }
    }

    /// Engine pointed at the sidecar named by `OCR_SERVICE_URL`, falling
    /// back to the conventional local port.
    pub fn from_env(accelerated: bool) -> Self {
        let base_url = std::env::var("OCR_SERVICE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5000".to_string());
        Self::new(&base_url, 120, accelerated)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the sidecar's health endpoint.
    pub fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send() {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn map_transport_error(&self, e: reqwest::Error) -> OcrError {
        if e.is_connect() {
            OcrError::NotReachable(self.base_url.clone())
        } else if e.is_timeout() {
            OcrError::Timeout(self.timeout_secs)
        } else {
            OcrError::Network(e.to_string())
        }
    }
}

impl OcrEngine for RemoteOcrEngine {
    fn detect(&self, image: &DynamicImage, options: &OcrOptions) -> Result<Vec<String>, OcrError> {
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| OcrError::ImageEncoding(e.to_string()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(png.into_inner());

        let url = format!("{}/detect", self.base_url);
        let body = DetectRequest {
            image: encoded,
            use_gpu: self.accelerated,
            options,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(OcrError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: DetectResponse = response
            .json()
            .map_err(|e| OcrError::ResponseParsing(e.to_string()))?;

        Ok(parsed.texts)
    }
}

// ──────────────────────────────────────────────
// MockOcrEngine (testing)
// ──────────────────────────────────────────────

/// Mock engine for tests: responds by prepared-image width, counts calls,
/// and can be forced to fail every call.
#[derive(Clone, Default)]
pub struct MockOcrEngine {
    responses: std::sync::Arc<std::collections::HashMap<u32, Vec<String>>>,
    calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    fail: bool,
}

impl MockOcrEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the fragments returned for images of the given width.
    /// Unregistered widths produce no fragments.
    pub fn respond_for_width(mut self, width: u32, fragments: &[&str]) -> Self {
        let mut responses = (*self.responses).clone();
        responses.insert(width, fragments.iter().map(|s| s.to_string()).collect());
        self.responses = std::sync::Arc::new(responses);
        self
    }

    /// Engine whose every detection call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Number of detection calls across all clones of this mock.
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl OcrEngine for MockOcrEngine {
    fn detect(&self, image: &DynamicImage, _options: &OcrOptions) -> Result<Vec<String>, OcrError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail {
            return Err(OcrError::Api {
                status: 500,
                message: "mock engine failure".to_string(),
            });
        }
        Ok(self
            .responses
            .get(&image.width())
            .cloned()
            .unwrap_or_default())
    }
}
