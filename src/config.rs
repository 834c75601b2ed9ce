//! Run configuration: one structure, constructed once per run, never mutated
//! afterwards. Every stage receives it by reference.

use std::str::FromStr;

use crate::pipeline::ocr::OcrOptions;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> &'static str {
    "framesift=info"
}

/// Default downscale applied to every frame before text detection (percent).
pub const DEFAULT_SCALE_PERCENT: u32 = 30;

/// Default similarity ratio above which two detections are considered the
/// same underlying sentence.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Worker cap while an accelerator is active. Kept low so concurrent
/// detection calls do not oversubscribe a shared accelerator.
pub const DEFAULT_WORKERS_ACCELERATED: usize = 2;

/// Upper bound on the CPU-derived worker count in standard mode.
pub const DEFAULT_WORKERS_STANDARD: usize = 8;

/// All tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Resize factor applied before detection, in percent of the original
    /// frame dimensions.
    pub scale_percent: u32,
    /// Optional cap on processed frames, applied by even-stride subsampling
    /// over the sorted listing.
    pub max_images: Option<usize>,
    /// Clustering threshold in [0, 1].
    pub similarity_threshold: f64,
    /// Whether the OCR capability runs on an accelerator.
    pub accelerated_mode: bool,
    /// Pool size when `accelerated_mode` is set.
    pub worker_cap_accelerated: usize,
    /// Upper bound for the CPU-derived pool size otherwise.
    pub worker_cap_standard: usize,
    /// Apply grayscale + histogram equalization before detection.
    pub enhance_contrast: bool,
    /// Ask the correction capability for a consensus version of each
    /// multi-member cluster.
    pub correction_enabled: bool,
    /// Detection tunables passed through to the OCR capability unchanged.
    pub ocr: OcrOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let accelerated_mode = false;
        Self {
            scale_percent: DEFAULT_SCALE_PERCENT,
            max_images: None,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            accelerated_mode,
            worker_cap_accelerated: DEFAULT_WORKERS_ACCELERATED,
            worker_cap_standard: DEFAULT_WORKERS_STANDARD,
            enhance_contrast: true,
            correction_enabled: true,
            ocr: OcrOptions::for_mode(accelerated_mode),
        }
    }
}

impl PipelineConfig {
    /// Build a configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let accelerated_mode = env_parse("FRAMESIFT_GPU_ENABLED", false);
        Self {
            scale_percent: env_parse("FRAMESIFT_SCALE_PERCENT", DEFAULT_SCALE_PERCENT),
            max_images: env_opt("FRAMESIFT_MAX_IMAGES"),
            similarity_threshold: env_parse(
                "FRAMESIFT_SIMILARITY_THRESHOLD",
                DEFAULT_SIMILARITY_THRESHOLD,
            ),
            accelerated_mode,
            worker_cap_accelerated: env_parse(
                "FRAMESIFT_WORKERS_ACCELERATED",
                DEFAULT_WORKERS_ACCELERATED,
            ),
            worker_cap_standard: env_parse(
                "FRAMESIFT_WORKERS_STANDARD",
                DEFAULT_WORKERS_STANDARD,
            ),
            enhance_contrast: env_parse("FRAMESIFT_ENHANCE_CONTRAST", true),
            correction_enabled: env_parse("FRAMESIFT_CORRECTION_ENABLED", true),
            ocr: OcrOptions::for_mode(accelerated_mode),
        }
    }

    /// Switch the execution mode, refreshing the mode-dependent OCR tunables.
    pub fn with_accelerated(mut self, accelerated: bool) -> Self {
        self.accelerated_mode = accelerated;
        self.ocr = OcrOptions::for_mode(accelerated);
        self
    }

    /// Extraction pool size for the active execution mode.
    ///
    /// Accelerated mode uses a small fixed cap; standard mode uses half the
    /// available cores, clamped to `[1, worker_cap_standard]`.
    pub fn worker_count(&self) -> usize {
        if self.accelerated_mode {
            self.worker_cap_accelerated.max(1)
        } else {
            (num_cpus::get() / 2).clamp(1, self.worker_cap_standard.max(1))
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().to_lowercase().parse().ok())
        .unwrap_or(default)
}

fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}
