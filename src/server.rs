//! On-demand single-image service: a thin HTTP wrapper over one OCR call
//! plus optional correction, with a health probe. The batch pipeline does
//! not depend on this module.
//!
//! The service holds a single preloaded engine handle and serializes access
//! to it through a mutex, so there is never more than one in-flight
//! detection. Requests block on a worker thread while the engine runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::pipeline::cluster::group_similar_texts;
use crate::pipeline::correction::{ChatCorrectionClient, CorrectionClient};
use crate::pipeline::ocr::{OcrEngine as _, OcrOptions, RemoteOcrEngine};
use crate::pipeline::preprocess;

pub struct ServerState {
    config: PipelineConfig,
    ocr: Arc<RemoteOcrEngine>,
    /// Held across each detection call: one caller at a time per engine.
    ocr_serial: tokio::sync::Mutex<()>,
    correction: Option<Arc<dyn CorrectionClient>>,
}

impl ServerState {
    /// State wired from the environment: OCR sidecar URL and, when a key is
    /// present, the correction client.
    pub fn from_env(config: PipelineConfig) -> Self {
        let ocr = Arc::new(RemoteOcrEngine::from_env(config.accelerated_mode));
        let correction = ChatCorrectionClient::from_env()
            .map(|client| Arc::new(client) as Arc<dyn CorrectionClient>);
        Self::new(config, ocr, correction)
    }

    pub fn new(
        config: PipelineConfig,
        ocr: Arc<RemoteOcrEngine>,
        correction: Option<Arc<dyn CorrectionClient>>,
    ) -> Self {
        Self {
            config,
            ocr,
            ocr_serial: tokio::sync::Mutex::new(()),
            correction,
        }
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/process", post(process_image))
        .route("/correct-texts", post(correct_texts))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: Arc<ServerState>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Single-image service listening");
    axum::serve(listener, router(state)).await
}

// ──────────────────────────────────────────────
// Request / response shapes
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    /// Base64 image, with or without a `data:image/...;base64,` prefix.
    pub image: String,
    #[serde(default)]
    pub use_gpu: Option<bool>,
    #[serde(default)]
    pub scale_percent: Option<u32>,
    #[serde(default)]
    pub correct_text: bool,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub texts: Vec<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_text: Option<String>,
    pub performance: Performance,
}

#[derive(Debug, Serialize)]
pub struct Performance {
    pub preprocessing_ms: u64,
    pub ocr_ms: u64,
    pub correction_ms: u64,
    pub total_ms: u64,
    pub accelerated: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ocr_available: bool,
    pub correction_available: bool,
}

#[derive(Debug, Deserialize)]
pub struct CorrectTextsRequest {
    pub texts: Vec<String>,
    #[serde(default)]
    pub group_similar: bool,
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct GroupedCorrection {
    pub original_texts: Vec<String>,
    pub corrected_text: String,
}

#[derive(Debug, Serialize)]
pub struct CorrectTextsResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouped_corrections: Option<Vec<GroupedCorrection>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_texts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error_response(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: error.into(),
        }),
    )
}

// ──────────────────────────────────────────────
// Handlers
// ──────────────────────────────────────────────

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let ocr = state.ocr.clone();
    let ocr_available = tokio::task::spawn_blocking(move || ocr.is_available())
        .await
        .unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        ocr_available,
        correction_available: state.correction.is_some(),
    })
}

async fn process_image(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let started = Instant::now();

    let image = decode_image_payload(&request.image)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;

    let accelerated = request.use_gpu.unwrap_or(state.config.accelerated_mode);
    let scale_percent = request.scale_percent.unwrap_or(state.config.scale_percent);
    let options = OcrOptions::for_mode(accelerated);

    let preprocess_started = Instant::now();
    let prepared = preprocess::prepare(&image, scale_percent, state.config.enhance_contrast);
    drop(image);
    let preprocessing_ms = preprocess_started.elapsed().as_millis() as u64;

    let ocr_started = Instant::now();
    let texts = {
        let _serial = state.ocr_serial.lock().await;
        let ocr = state.ocr.clone();
        tokio::task::spawn_blocking(move || ocr.detect(&prepared, &options))
            .await
            .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
            .map_err(|e| error_response(StatusCode::BAD_GATEWAY, e.to_string()))?
    };
    let ocr_ms = ocr_started.elapsed().as_millis() as u64;

    let mut correction_ms = 0u64;
    let mut corrected_text = None;
    if request.correct_text && !texts.is_empty() {
        if let Some(client) = state.correction.clone() {
            let correction_started = Instant::now();
            let to_correct = texts.clone();
            corrected_text =
                tokio::task::spawn_blocking(move || client.correct(&to_correct).ok())
                    .await
                    .unwrap_or(None);
            correction_ms = correction_started.elapsed().as_millis() as u64;
        }
    }

    Ok(Json(ProcessResponse {
        success: true,
        text: texts.join("\n"),
        texts,
        corrected_text,
        performance: Performance {
            preprocessing_ms,
            ocr_ms,
            correction_ms,
            total_ms: started.elapsed().as_millis() as u64,
            accelerated,
        },
    }))
}

async fn correct_texts(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CorrectTextsRequest>,
) -> Result<Json<CorrectTextsResponse>, ApiError> {
    let Some(client) = state.correction.clone() else {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Correction service is not configured",
        ));
    };
    if request.texts.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "No texts provided"));
    }

    let threshold = request
        .similarity_threshold
        .unwrap_or(state.config.similarity_threshold);
    let texts = request.texts;
    let group_similar = request.group_similar;

    let response = tokio::task::spawn_blocking(move || {
        if group_similar {
            let groups = group_similar_texts(&texts, threshold);
            let grouped = correct_groups(&groups, client.as_ref());
            CorrectTextsResponse {
                success: true,
                grouped_corrections: Some(grouped),
                original_texts: None,
                corrected_text: None,
            }
        } else {
            let corrected = client.correct(&texts).ok();
            CorrectTextsResponse {
                success: true,
                grouped_corrections: None,
                corrected_text: corrected,
                original_texts: Some(texts),
            }
        }
    })
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(response))
}

/// Correct each group independently; a failed call falls back to the
/// group's first member, mirroring the batch pipeline's recovery.
fn correct_groups(groups: &[Vec<String>], client: &dyn CorrectionClient) -> Vec<GroupedCorrection> {
    groups
        .iter()
        .map(|group| {
            let corrected = match client.correct(group) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Group correction failed, using first member");
                    group.first().cloned().unwrap_or_default()
                }
            };
            GroupedCorrection {
                original_texts: group.clone(),
                corrected_text: corrected,
            }
        })
        .collect()
}

fn decode_image_payload(payload: &str) -> Result<image::DynamicImage, String> {
    let raw = match payload.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:image") => rest,
        _ => payload,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|e| format!("Invalid base64 image: {e}"))?;
    image::load_from_memory(&bytes).map_err(|e| format!("Invalid image: {e}"))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use base64::Engine as _;
    use image::{GenericImageView, ImageFormat, Rgb, RgbImage};

    use crate::pipeline::correction::MockCorrectionClient;

    use super::*;

    fn png_base64(width: u32, height: u32) -> String {
        let image = RgbImage::from_pixel(width, height, Rgb([120, 10, 60]));
        let mut buffer = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        base64::engine::general_purpose::STANDARD.encode(buffer.into_inner())
    }

    #[test]
    fn decode_accepts_bare_base64() {
        let decoded = decode_image_payload(&png_base64(12, 8)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 8));
    }

    #[test]
    fn decode_strips_data_url_prefix() {
        let payload = format!("data:image/png;base64,{}", png_base64(6, 6));
        let decoded = decode_image_payload(&payload).unwrap();
        assert_eq!(decoded.width(), 6);
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        assert!(decode_image_payload("@@not base64@@").is_err());
    }

    #[test]
    fn decode_rejects_non_image_bytes() {
        let payload = base64::engine::general_purpose::STANDARD.encode(b"plain text");
        assert!(decode_image_payload(&payload).is_err());
    }

    #[test]
    fn process_request_defaults() {
        let request: ProcessRequest = serde_json::from_str(r#"{"image":"abcd"}"#).unwrap();
        assert!(request.use_gpu.is_none());
        assert!(request.scale_percent.is_none());
        assert!(!request.correct_text);
    }

    #[test]
    fn process_response_omits_absent_correction() {
        let response = ProcessResponse {
            success: true,
            texts: vec!["line".to_string()],
            text: "line".to_string(),
            corrected_text: None,
            performance: Performance {
                preprocessing_ms: 1,
                ocr_ms: 2,
                correction_ms: 0,
                total_ms: 3,
                accelerated: false,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("corrected_text").is_none());
        assert_eq!(json["performance"]["ocr_ms"], 2);
    }

    #[test]
    fn correct_groups_falls_back_per_group_on_failure() {
        let groups = vec![
            vec!["first variant".to_string(), "first varlant".to_string()],
            vec!["second".to_string()],
        ];
        let client = MockCorrectionClient::failing();
        let corrected = correct_groups(&groups, &client);
        assert_eq!(corrected.len(), 2);
        assert_eq!(corrected[0].corrected_text, "first variant");
        assert_eq!(corrected[1].corrected_text, "second");
    }

    #[test]
    fn correct_groups_uses_client_output() {
        let groups = vec![vec!["a sentence".to_string(), "a sentense".to_string()]];
        let client = MockCorrectionClient::returning("a sentence");
        let corrected = correct_groups(&groups, &client);
        assert_eq!(corrected[0].corrected_text, "a sentence");
        assert_eq!(corrected[0].original_texts.len(), 2);
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn router_builds_with_env_free_state() {
        let state = Arc::new(ServerState::new(
            PipelineConfig::default(),
            Arc::new(RemoteOcrEngine::new("http://127.0.0.1:5000", 5, false)),
            None,
        ));
        let _router = router(state);
    }

    #[test]
    fn correct_texts_request_defaults() {
        let request: CorrectTextsRequest =
            serde_json::from_str(r#"{"texts":["a","b"]}"#).unwrap();
        assert!(!request.group_similar);
        assert!(request.similarity_threshold.is_none());
        assert_eq!(request.texts.len(), 2);
    }
}
