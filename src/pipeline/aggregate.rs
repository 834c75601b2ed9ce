//! Result aggregation: assemble the final ordered record list and attach
//! the source-frame back-references. This is the boundary handed to the
//! serializer; records are never mutated after creation.

use serde::{Deserialize, Serialize};

use super::correction::ClusterResolution;
use super::types::TextCluster;

/// Sentinel frame name when a record has no known source frame.
pub const UNKNOWN_IMAGE: &str = "unknown";

/// Whether a record's text came back from the correction capability or is
/// the raw extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextType {
    Corrected,
    Raw,
}

/// One final output entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub text: String,
    pub text_type: TextType,
    /// Representative source frame filename, or `"unknown"`.
    pub image: String,
    pub confidence: f32,
    /// The cluster's original member texts; present only for corrected
    /// entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_texts: Option<Vec<String>>,
    pub is_significant: bool,
}

/// Zip resolved clusters into final records, preserving cluster order.
pub fn aggregate(
    clusters: &[TextCluster],
    resolutions: Vec<ClusterResolution>,
) -> Vec<CorrectionRecord> {
    debug_assert_eq!(clusters.len(), resolutions.len());

    clusters
        .iter()
        .zip(resolutions)
        .map(|(cluster, resolution)| CorrectionRecord {
            text: resolution.text,
            text_type: if resolution.corrected {
                TextType::Corrected
            } else {
                TextType::Raw
            },
            image: cluster
                .seed()
                .map(|seed| seed.frame.name.clone())
                .unwrap_or_else(|| UNKNOWN_IMAGE.to_string()),
            confidence: resolution.confidence,
            original_texts: resolution.original_texts,
            is_significant: resolution.is_significant,
        })
        .collect()
}
