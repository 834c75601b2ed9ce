//! End-to-end pipeline run: frames -> buckets -> extraction -> clusters ->
//! consensus correction -> final records.
//!
//! Only the extraction stage is parallel; every other stage works over
//! already-collected data on the calling thread. Correction runs one
//! cluster at a time here, but the client contract allows callers to fan
//! out across clusters later.

use std::path::Path;
use std::time::Instant;

use super::aggregate::{aggregate, CorrectionRecord};
use super::cluster::cluster_detections;
use super::correction::{resolve_cluster, CorrectionClient};
use super::fingerprint::bucket_frames;
use super::frames::{list_frames, subsample};
use super::ocr::OcrEngineFactory;
use super::scheduler::extract_buckets;
use super::PipelineError;
use crate::config::PipelineConfig;

/// Counters describing one run, for logs and the CLI summary.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub frames_total: usize,
    pub frames_selected: usize,
    pub frames_unique: usize,
    pub frames_unreadable: usize,
    pub extraction_failed: usize,
    pub extraction_empty: usize,
    pub detections: usize,
    pub clusters: usize,
    pub corrected: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
pub struct PipelineReport {
    pub records: Vec<CorrectionRecord>,
    pub stats: PipelineStats,
}

/// Run the whole pipeline over one frame directory.
///
/// A missing directory is the only fatal input condition. Everything else
/// (unreadable frames, failed detections, failed corrections) is recovered
/// locally and reflected in the stats, and an empty batch yields an empty
/// record list without touching either external capability.
pub fn run_pipeline(
    frames_dir: &Path,
    config: &PipelineConfig,
    ocr_factory: &OcrEngineFactory,
    correction: Option<&dyn CorrectionClient>,
) -> Result<PipelineReport, PipelineError> {
    let started = Instant::now();
    let mut stats = PipelineStats::default();

    let frames = list_frames(frames_dir)?;
    stats.frames_total = frames.len();
    tracing::info!(dir = %frames_dir.display(), frames = frames.len(), "Frame listing complete");

    let selected = subsample(frames, config.max_images);
    stats.frames_selected = selected.len();
    if stats.frames_selected < stats.frames_total {
        tracing::info!(
            selected = stats.frames_selected,
            total = stats.frames_total,
            "Frame cap applied by even-stride subsampling"
        );
    }

    let bucketed = bucket_frames(selected);
    stats.frames_unique = bucketed.buckets.len();
    stats.frames_unreadable = bucketed.unreadable;

    let extracted = extract_buckets(bucketed.buckets, config, ocr_factory);
    stats.extraction_failed = extracted.failed;
    stats.extraction_empty = extracted.empty;
    stats.detections = extracted.detections.len();

    let clusters = cluster_detections(extracted.detections, config.similarity_threshold);
    stats.clusters = clusters.len();

    let client = if config.correction_enabled { correction } else { None };
    let resolutions: Vec<_> = clusters
        .iter()
        .map(|cluster| resolve_cluster(cluster, client))
        .collect();
    stats.corrected = resolutions.iter().filter(|r| r.corrected).count();

    let records = aggregate(&clusters, resolutions);
    stats.elapsed_ms = started.elapsed().as_millis() as u64;

    tracing::info!(
        records = records.len(),
        clusters = stats.clusters,
        corrected = stats.corrected,
        elapsed_ms = stats.elapsed_ms,
        "Pipeline run complete"
    );

    Ok(PipelineReport { records, stats })
}
