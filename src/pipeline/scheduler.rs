//! Extraction scheduler: dispatches bucket representatives to the OCR
//! capability across a bounded pool of worker threads.
//!
//! Discipline: each worker builds its own engine from the factory once and
//! owns it exclusively for all of its items; nothing mutable is shared
//! between workers. Results arrive in completion order and are re-sorted
//! into original frame order before clustering, so downstream grouping is
//! reproducible across runs.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use thiserror::Error;

use super::fingerprint::FrameBucket;
use super::ocr::{OcrEngine, OcrEngineFactory, OcrError};
use super::preprocess;
use super::types::{Detection, FrameFile};
use crate::config::PipelineConfig;

/// Why one frame produced no text. Carried as a value so no failure crosses
/// the stage boundary as a panic or early return.
#[derive(Error, Debug)]
pub enum ItemFailure {
    #[error("frame could not be decoded: {0}")]
    Decode(String),

    #[error("text detection failed: {0}")]
    Detection(#[from] OcrError),
}

enum ExtractionOutcome {
    Text(Detection),
    Empty { frame: FrameFile },
    Failed { frame: FrameFile, reason: ItemFailure },
}

/// Everything the scheduler learned from one batch.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    /// Non-empty detections, sorted by original frame index.
    pub detections: Vec<Detection>,
    /// Frames whose extraction failed (decode or engine error).
    pub failed: usize,
    /// Frames whose extraction yielded only whitespace.
    pub empty: usize,
}

/// Run extraction over the bucket representatives.
///
/// Pool size follows the execution mode (see `PipelineConfig::worker_count`)
/// and never exceeds the number of buckets. A worker whose engine fails to
/// initialize exits alone; remaining workers drain the queue.
pub fn extract_buckets(
    buckets: Vec<FrameBucket>,
    config: &PipelineConfig,
    factory: &OcrEngineFactory,
) -> ExtractionReport {
    if buckets.is_empty() {
        return ExtractionReport::default();
    }

    let workers = config.worker_count().min(buckets.len()).max(1);
    tracing::info!(
        workers,
        buckets = buckets.len(),
        accelerated = config.accelerated_mode,
        "Starting extraction pool"
    );

    let queue = Mutex::new(VecDeque::from(buckets));
    let (tx, rx) = mpsc::channel();

    std::thread::scope(|scope| {
        for worker_id in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            scope.spawn(move || worker_loop(worker_id, queue, factory, config, tx));
        }
    });
    drop(tx);

    let mut report = ExtractionReport::default();
    for outcome in rx {
        match outcome {
            ExtractionOutcome::Text(detection) => report.detections.push(detection),
            ExtractionOutcome::Empty { frame } => {
                tracing::debug!(frame = %frame.name, "No text detected");
                report.empty += 1;
            }
            ExtractionOutcome::Failed { frame, reason } => {
                tracing::warn!(frame = %frame.name, error = %reason, "Extraction failed for frame");
                report.failed += 1;
            }
        }
    }

    // Canonical order: completion order depends on worker timing, frame
    // index does not.
    report.detections.sort_by_key(|d| d.frame.index);

    tracing::info!(
        detections = report.detections.len(),
        empty = report.empty,
        failed = report.failed,
        "Extraction pool finished"
    );

    report
}

fn worker_loop(
    worker_id: usize,
    queue: &Mutex<VecDeque<FrameBucket>>,
    factory: &OcrEngineFactory,
    config: &PipelineConfig,
    tx: mpsc::Sender<ExtractionOutcome>,
) {
    let engine = match factory() {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(
                worker = worker_id,
                error = %e,
                "Engine initialization failed, worker exiting"
            );
            return;
        }
    };

    loop {
        let bucket = {
            let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.pop_front()
        };
        let Some(bucket) = bucket else { break };

        let outcome = process_bucket(bucket, engine.as_ref(), config);
        if tx.send(outcome).is_err() {
            break;
        }
    }
}

fn process_bucket(
    bucket: FrameBucket,
    engine: &dyn OcrEngine,
    config: &PipelineConfig,
) -> ExtractionOutcome {
    let started = Instant::now();
    let sources: Vec<String> = bucket.frames.iter().map(|f| f.name.clone()).collect();
    let frame = bucket.representative().clone();

    let image = match image::open(&frame.path) {
        Ok(image) => image,
        Err(e) => {
            return ExtractionOutcome::Failed {
                frame,
                reason: ItemFailure::Decode(e.to_string()),
            }
        }
    };

    let prepared = preprocess::prepare(&image, config.scale_percent, config.enhance_contrast);
    drop(image);

    let fragments = match engine.detect(&prepared, &config.ocr) {
        Ok(fragments) => fragments,
        Err(e) => {
            return ExtractionOutcome::Failed {
                frame,
                reason: ItemFailure::Detection(e),
            }
        }
    };
    drop(prepared);

    let text = fragments.join("\n");
    if text.trim().is_empty() {
        return ExtractionOutcome::Empty { frame };
    }

    tracing::debug!(
        frame = %frame.name,
        duplicates = sources.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Text extracted"
    );

    ExtractionOutcome::Text(Detection {
        text,
        frame,
        sources,
        elapsed: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{Rgb, RgbImage};

    use super::super::fingerprint::bucket_frames;
    use super::super::ocr::MockOcrEngine;
    use super::*;

    fn write_frame(path: &Path, width: u32, color: [u8; 3]) {
        RgbImage::from_pixel(width, 20, Rgb(color)).save(path).unwrap();
    }

    fn frame_file(index: usize, path: &Path) -> FrameFile {
        FrameFile {
            index,
            name: path.file_name().unwrap().to_str().unwrap().to_string(),
            path: path.to_path_buf(),
        }
    }

    /// Config that keeps prepared images byte-stable for the width-keyed mock.
    fn passthrough_config() -> PipelineConfig {
        PipelineConfig {
            scale_percent: 100,
            enhance_contrast: false,
            ..PipelineConfig::default()
        }
    }

    fn mock_factory(
        mock: MockOcrEngine,
    ) -> impl Fn() -> Result<Box<dyn OcrEngine>, OcrError> + Send + Sync {
        move || Ok(Box::new(mock.clone()) as Box<dyn OcrEngine>)
    }

    #[test]
    fn each_unique_frame_is_detected_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("frame_0001.png");
        let b = dir.path().join("frame_0002.png");
        let c = dir.path().join("frame_0003.png");
        write_frame(&a, 40, [255, 0, 0]);
        write_frame(&b, 40, [255, 0, 0]); // pixel-identical to a
        write_frame(&c, 50, [0, 0, 255]);

        let report = bucket_frames(vec![
            frame_file(0, &a),
            frame_file(1, &b),
            frame_file(2, &c),
        ]);
        assert_eq!(report.buckets.len(), 2);

        let mock = MockOcrEngine::new()
            .respond_for_width(40, &["first text"])
            .respond_for_width(50, &["second text"]);
        let factory = mock_factory(mock.clone());

        let extracted = extract_buckets(report.buckets, &passthrough_config(), &factory);

        assert_eq!(mock.call_count(), 2, "one detection call per bucket");
        assert_eq!(extracted.detections.len(), 2);
        // The duplicate pair is carried as sources on one detection.
        assert_eq!(extracted.detections[0].sources.len(), 2);
        assert_eq!(extracted.detections[1].sources, vec!["frame_0003.png"]);
    }

    #[test]
    fn whitespace_only_detections_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("frame_0001.png");
        write_frame(&a, 40, [9, 9, 9]);

        let report = bucket_frames(vec![frame_file(0, &a)]);
        let mock = MockOcrEngine::new().respond_for_width(40, &["  ", ""]);
        let factory = mock_factory(mock);

        let extracted = extract_buckets(report.buckets, &passthrough_config(), &factory);
        assert!(extracted.detections.is_empty());
        assert_eq!(extracted.empty, 1);
        assert_eq!(extracted.failed, 0);
    }

    #[test]
    fn engine_failure_is_isolated_per_item() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("frame_0001.png");
        write_frame(&a, 40, [9, 9, 9]);

        let report = bucket_frames(vec![frame_file(0, &a)]);
        let factory = mock_factory(MockOcrEngine::failing());

        let extracted = extract_buckets(report.buckets, &passthrough_config(), &factory);
        assert!(extracted.detections.is_empty());
        assert_eq!(extracted.failed, 1);
    }

    #[test]
    fn fragments_are_newline_joined() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("frame_0001.png");
        write_frame(&a, 40, [9, 9, 9]);

        let report = bucket_frames(vec![frame_file(0, &a)]);
        let mock = MockOcrEngine::new().respond_for_width(40, &["line one", "line two"]);
        let factory = mock_factory(mock);

        let extracted = extract_buckets(report.buckets, &passthrough_config(), &factory);
        assert_eq!(extracted.detections[0].text, "line one\nline two");
    }

    #[test]
    fn detections_come_back_in_frame_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut frames = Vec::new();
        for i in 0..6usize {
            let path = dir.path().join(format!("frame_{i:04}.png"));
            write_frame(&path, 30 + i as u32, [i as u8 * 30, 0, 0]);
            frames.push(frame_file(i, &path));
        }
        // Reverse submission order; output must still be by frame index.
        frames.reverse();

        let mut mock = MockOcrEngine::new();
        for i in 0..6u32 {
            mock = mock.respond_for_width(30 + i, &[&format!("text {i}")]);
        }
        let report = bucket_frames(frames);
        let factory = mock_factory(mock);

        let extracted = extract_buckets(report.buckets, &passthrough_config(), &factory);
        let order: Vec<usize> = extracted.detections.iter().map(|d| d.frame.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn one_failed_worker_does_not_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut frames = Vec::new();
        for i in 0..4usize {
            let path = dir.path().join(format!("frame_{i:04}.png"));
            write_frame(&path, 30 + i as u32, [i as u8 * 40, 0, 0]);
            frames.push(frame_file(i, &path));
        }

        let mut mock = MockOcrEngine::new();
        for i in 0..4u32 {
            mock = mock.respond_for_width(30 + i, &[&format!("text {i}")]);
        }

        // The first factory call fails; every later worker gets an engine.
        let attempts = AtomicUsize::new(0);
        let factory = move || {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(OcrError::NotReachable("http://127.0.0.1:1".to_string()))
            } else {
                Ok(Box::new(mock.clone()) as Box<dyn OcrEngine>)
            }
        };

        // Accelerated mode pins the pool at exactly two workers.
        let config = PipelineConfig {
            accelerated_mode: true,
            worker_cap_accelerated: 2,
            ..passthrough_config()
        };
        let report = bucket_frames(frames);
        let extracted = extract_buckets(report.buckets, &config, &factory);

        assert_eq!(extracted.detections.len(), 4, "surviving workers drain the queue");
    }

    #[test]
    fn empty_bucket_list_makes_no_engine_calls() {
        let mock = MockOcrEngine::new();
        let factory = mock_factory(mock.clone());
        let extracted = extract_buckets(Vec::new(), &passthrough_config(), &factory);
        assert!(extracted.detections.is_empty());
        assert_eq!(mock.call_count(), 0);
    }
}
