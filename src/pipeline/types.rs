//! Shared data model for the extraction pipeline.

use std::path::PathBuf;
use std::time::Duration;

/// One candidate frame from the input directory.
///
/// `index` is the position in the lexically sorted listing, assigned before
/// any subsampling, so it stays a stable ordering key for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFile {
    pub index: usize,
    pub name: String,
    pub path: PathBuf,
}

/// The raw text recognized for one bucket representative.
///
/// `sources` lists every frame name sharing the representative's fingerprint,
/// preserving the back-reference from text to originating frames.
#[derive(Debug, Clone)]
pub struct Detection {
    pub text: String,
    pub frame: FrameFile,
    pub sources: Vec<String>,
    pub elapsed: Duration,
}

/// An ordered group of detections judged to be the same underlying sentence.
///
/// The first member is the cluster seed; similarity comparisons for the
/// cluster were anchored to it.
#[derive(Debug, Clone)]
pub struct TextCluster {
    pub members: Vec<Detection>,
}

impl TextCluster {
    pub fn seed(&self) -> Option<&Detection> {
        self.members.first()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_texts(&self) -> Vec<String> {
        self.members.iter().map(|d| d.text.clone()).collect()
    }
}

#[cfg(test)]
pub(crate) fn test_detection(text: &str, index: usize) -> Detection {
    Detection {
        text: text.to_string(),
        frame: FrameFile {
            index,
            name: format!("frame_{index:04}.png"),
            path: PathBuf::from(format!("/frames/frame_{index:04}.png")),
        },
        sources: vec![format!("frame_{index:04}.png")],
        elapsed: Duration::from_millis(5),
    }
}
