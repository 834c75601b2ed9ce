//! Result serialization: the final record list is written to a well-known
//! location next to the input directory (`../ocr/ocr_results.json`).

use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::aggregate::CorrectionRecord;
use crate::pipeline::PipelineError;

pub const OUTPUT_DIR_NAME: &str = "ocr";
pub const OUTPUT_FILE_NAME: &str = "ocr_results.json";

/// Where results for `frames_dir` land. A root-level frames directory (no
/// parent) keeps the output beside itself.
pub fn result_path(frames_dir: &Path) -> PathBuf {
    frames_dir
        .parent()
        .unwrap_or(frames_dir)
        .join(OUTPUT_DIR_NAME)
        .join(OUTPUT_FILE_NAME)
}

/// Write the records as pretty-printed JSON, creating the output directory
/// if absent. Returns the path written.
pub fn write_results(
    frames_dir: &Path,
    records: &[CorrectionRecord],
) -> Result<PathBuf, PipelineError> {
    let path = result_path(frames_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, records)
        .map_err(|e| PipelineError::OutputWrite(e.to_string()))?;

    tracing::info!(path = %path.display(), records = records.len(), "Results written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use crate::pipeline::aggregate::{TextType, UNKNOWN_IMAGE};

    use super::*;

    fn sample_record() -> CorrectionRecord {
        CorrectionRecord {
            text: "Bonjour tout le monde".to_string(),
            text_type: TextType::Corrected,
            image: "frame_0001.png".to_string(),
            confidence: 0.95,
            original_texts: Some(vec!["Bonjour tuot le monde".to_string()]),
            is_significant: true,
        }
    }

    #[test]
    fn result_path_is_sibling_ocr_directory() {
        let path = result_path(Path::new("/data/run42/frames"));
        assert_eq!(path, Path::new("/data/run42/ocr/ocr_results.json"));
    }

    #[test]
    fn write_creates_directory_and_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let frames_dir = root.path().join("frames");
        fs::create_dir(&frames_dir).unwrap();

        let path = write_results(&frames_dir, &[sample_record()]).unwrap();
        assert!(path.exists());
        assert_eq!(path.parent().unwrap(), root.path().join(OUTPUT_DIR_NAME));

        let raw = fs::read_to_string(&path).unwrap();
        let back: Vec<CorrectionRecord> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].text, "Bonjour tout le monde");
    }

    #[test]
    fn empty_batch_writes_an_empty_list() {
        let root = tempfile::tempdir().unwrap();
        let frames_dir = root.path().join("frames");
        fs::create_dir(&frames_dir).unwrap();

        let path = write_results(&frames_dir, &[]).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.trim(), "[]");
    }

    #[test]
    fn overwrites_a_previous_run() {
        let root = tempfile::tempdir().unwrap();
        let frames_dir = root.path().join("frames");
        fs::create_dir(&frames_dir).unwrap();

        write_results(&frames_dir, &[sample_record()]).unwrap();
        let path = write_results(
            &frames_dir,
            &[CorrectionRecord {
                text: "second run".to_string(),
                text_type: TextType::Raw,
                image: UNKNOWN_IMAGE.to_string(),
                confidence: 0.7,
                original_texts: None,
                is_significant: true,
            }],
        )
        .unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let back: Vec<CorrectionRecord> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].text, "second run");
    }
}
