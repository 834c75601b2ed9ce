//! Frame source: enumerates candidate frames from a directory in a stable
//! lexical order, with optional even-stride subsampling.

use std::path::Path;

use super::types::FrameFile;
use super::PipelineError;

/// Frame formats the pipeline accepts. Everything else in the directory is
/// ignored silently (thumbnails, sidecar files, the output directory itself).
const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// List the frames of a directory in lexical filename order.
///
/// A missing directory is the one fatal input condition: nothing has been
/// processed yet and the caller gets a clear diagnostic.
pub fn list_frames(dir: &Path) -> Result<Vec<FrameFile>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::InputMissing(dir.to_path_buf()));
    }

    let mut entries: Vec<(String, std::path::PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_frame = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                FRAME_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false);
        if !is_frame {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            entries.push((name.to_string(), path.clone()));
        }
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, (name, path))| FrameFile { index, name, path })
        .collect())
}

/// Cap the frame list at `cap` entries by even-stride subsampling.
///
/// A prefix-take would discard the tail of the clip entirely; striding keeps
/// temporal coverage across the whole sorted list. Original sort indices are
/// preserved on the surviving frames.
pub fn subsample(frames: Vec<FrameFile>, cap: Option<usize>) -> Vec<FrameFile> {
    let Some(cap) = cap else { return frames };
    if cap == 0 {
        return Vec::new();
    }
    if frames.len() <= cap {
        return frames;
    }

    let step = frames.len() as f64 / cap as f64;
    let mut picked = Vec::with_capacity(cap);
    let mut slots: Vec<Option<FrameFile>> = frames.into_iter().map(Some).collect();
    for k in 0..cap {
        let idx = ((k as f64 * step).floor() as usize).min(slots.len() - 1);
        if let Some(frame) = slots[idx].take() {
            picked.push(frame);
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn missing_directory_is_fatal() {
        let result = list_frames(Path::new("/nonexistent/frames"));
        assert!(matches!(result, Err(PipelineError::InputMissing(_))));
    }

    #[test]
    fn frames_listed_in_lexical_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "frame_0010.png");
        touch(dir.path(), "frame_0002.png");
        touch(dir.path(), "frame_0001.png");

        let frames = list_frames(dir.path()).unwrap();
        let names: Vec<&str> = frames.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["frame_0001.png", "frame_0002.png", "frame_0010.png"]);
        assert_eq!(frames[2].index, 2);
    }

    #[test]
    fn non_frame_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "frame_0001.png");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "clip.mp4");
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let frames = list_frames(dir.path()).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "frame_0001.png");
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "frame_0001.PNG");
        touch(dir.path(), "frame_0002.Jpg");

        let frames = list_frames(dir.path()).unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn empty_directory_yields_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_frames(dir.path()).unwrap().is_empty());
    }

    fn synthetic_frames(count: usize) -> Vec<FrameFile> {
        (0..count)
            .map(|index| FrameFile {
                index,
                name: format!("frame_{index:04}.png"),
                path: format!("/frames/frame_{index:04}.png").into(),
            })
            .collect()
    }

    #[test]
    fn subsample_without_cap_keeps_everything() {
        let frames = synthetic_frames(10);
        assert_eq!(subsample(frames, None).len(), 10);
    }

    #[test]
    fn subsample_under_cap_keeps_everything() {
        let frames = synthetic_frames(3);
        assert_eq!(subsample(frames, Some(10)).len(), 3);
    }

    #[test]
    fn subsample_strides_across_the_whole_list() {
        let frames = synthetic_frames(10);
        let picked = subsample(frames, Some(3));
        let indices: Vec<usize> = picked.iter().map(|f| f.index).collect();
        // 10 frames at cap 3: stride 3.33 picks the head, middle, and tail
        // regions rather than the first three frames.
        assert_eq!(indices, vec![0, 3, 6]);
    }

    #[test]
    fn subsample_preserves_original_indices_and_order() {
        let frames = synthetic_frames(100);
        let picked = subsample(frames, Some(7));
        assert_eq!(picked.len(), 7);
        let indices: Vec<usize> = picked.iter().map(|f| f.index).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
        assert!(*indices.last().unwrap() > 80, "tail region must be covered");
    }

    #[test]
    fn subsample_cap_zero_yields_nothing() {
        let frames = synthetic_frames(5);
        assert!(subsample(frames, Some(0)).is_empty());
    }
}
