//! Perceptual deduplication: a deterministic content fingerprint per frame,
//! and bucketing of frames that share one.
//!
//! The fingerprint is an exact digest over a canonical reduction of the
//! frame (32x32 grayscale), so pixel-identical frames always collide and
//! visually different frames are statistically distinct. It is a dedup
//! heuristic, not a cryptographic identity guarantee.

use std::collections::HashMap;
use std::fmt;

use image::imageops::FilterType;
use image::DynamicImage;
use sha2::{Digest, Sha256};

use super::types::FrameFile;

/// Edge length of the canonical reduction hashed for the fingerprint.
const FINGERPRINT_EDGE: u32 = 32;

/// A compact deterministic digest of a frame's downsampled pixel content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// All frames sharing one fingerprint, in first-seen order.
///
/// Only the representative (the first frame seen) is sent to extraction;
/// the rest ride along as back-references for the final records.
#[derive(Debug, Clone)]
pub struct FrameBucket {
    pub fingerprint: Fingerprint,
    pub frames: Vec<FrameFile>,
}

impl FrameBucket {
    pub fn representative(&self) -> &FrameFile {
        &self.frames[0]
    }
}

/// Result of bucketing one frame listing.
#[derive(Debug)]
pub struct BucketReport {
    /// Buckets in first-seen order of their representative.
    pub buckets: Vec<FrameBucket>,
    /// Frames excluded because they could not be decoded.
    pub unreadable: usize,
}

/// Fingerprint a decoded frame.
///
/// Depends only on pixel content: reduce to a fixed 32x32 grayscale
/// representation, then digest the raw luma bytes.
pub fn fingerprint_image(image: &DynamicImage) -> Fingerprint {
    let reduced = image
        .resize_exact(FINGERPRINT_EDGE, FINGERPRINT_EDGE, FilterType::Triangle)
        .to_luma8();
    let digest = Sha256::digest(reduced.as_raw());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Fingerprint(bytes)
}

/// Group frames into fingerprint buckets.
///
/// Each frame is decoded, fingerprinted, and dropped again; only paths and
/// names are retained. A frame that fails to decode is excluded from
/// bucketing and logged, never fatal to the batch.
pub fn bucket_frames(frames: Vec<FrameFile>) -> BucketReport {
    let mut positions: HashMap<Fingerprint, usize> = HashMap::new();
    let mut buckets: Vec<FrameBucket> = Vec::new();
    let mut unreadable = 0usize;

    for frame in frames {
        let image = match image::open(&frame.path) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(
                    frame = %frame.name,
                    error = %e,
                    "Frame could not be decoded, excluding it from the batch"
                );
                unreadable += 1;
                continue;
            }
        };
        let fingerprint = fingerprint_image(&image);
        drop(image);

        match positions.get(&fingerprint) {
            Some(&at) => buckets[at].frames.push(frame),
            None => {
                positions.insert(fingerprint, buckets.len());
                buckets.push(FrameBucket {
                    fingerprint,
                    frames: vec![frame],
                });
            }
        }
    }

    tracing::info!(
        buckets = buckets.len(),
        unreadable,
        "Fingerprint bucketing complete"
    );

    BucketReport { buckets, unreadable }
}
