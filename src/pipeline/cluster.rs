//! Text clustering: greedy single-link grouping of detections by a
//! sequence-similarity ratio.
//!
//! Comparisons are anchored to each cluster's seed (its first member), not
//! pairwise within the growing cluster. Two texts can therefore share a
//! cluster without being directly similar, as long as both clear the
//! threshold against the seed. That asymmetry keeps the comparison count
//! linear per cluster and is intentional, documented behavior.

use std::collections::HashMap;

use super::types::{Detection, TextCluster};

/// Similarity ratio of two strings in [0, 1], symmetric in its arguments.
///
/// Ratcliff/Obershelp sequence matching over chars: find the longest
/// contiguous matching block, recurse on the pieces left and right of it,
/// and score `2 * matched / (len_a + len_b)`. Two empty strings rate 1.0.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let mut b_positions: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, &ch) in b.iter().enumerate() {
        b_positions.entry(ch).or_default().push(j);
    }

    let mut matched = 0usize;
    let mut pending = vec![(0usize, a.len(), 0usize, b.len())];
    while let Some((a_lo, a_hi, b_lo, b_hi)) = pending.pop() {
        let (block_a, block_b, size) = longest_match(&a, &b_positions, a_lo, a_hi, b_lo, b_hi);
        if size == 0 {
            continue;
        }
        matched += size;
        pending.push((a_lo, block_a, b_lo, block_b));
        pending.push((block_a + size, a_hi, block_b + size, b_hi));
    }

    (2.0 * matched as f64) / (total as f64)
}

/// Longest contiguous block common to `a[a_lo..a_hi]` and `b[b_lo..b_hi]`.
///
/// Runs the classic one-row dynamic program: for each position in `a`, track
/// the length of the common run ending at every matching position in `b`.
fn longest_match(
    a: &[char],
    b_positions: &HashMap<char, Vec<usize>>,
    a_lo: usize,
    a_hi: usize,
    b_lo: usize,
    b_hi: usize,
) -> (usize, usize, usize) {
    let mut best = (a_lo, b_lo, 0usize);
    let mut run_lengths: HashMap<usize, usize> = HashMap::new();

    for (i, &ch) in a.iter().enumerate().take(a_hi).skip(a_lo) {
        let mut next_runs: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b_positions.get(&ch) {
            for &j in positions {
                if j < b_lo {
                    continue;
                }
                if j >= b_hi {
                    break;
                }
                let len = if j > b_lo {
                    run_lengths.get(&(j - 1)).copied().unwrap_or(0) + 1
                } else {
                    1
                };
                next_runs.insert(j, len);
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        run_lengths = next_runs;
    }

    best
}

/// Group detections into clusters of "probably the same sentence".
///
/// Detections are processed in input order. Each unprocessed detection opens
/// a new cluster and claims every later unprocessed detection whose ratio
/// against the cluster seed meets the threshold. Clusters partition the
/// input and appear in first-occurrence order of their seeds.
pub fn cluster_detections(detections: Vec<Detection>, threshold: f64) -> Vec<TextCluster> {
    let n = detections.len();
    let mut slots: Vec<Option<Detection>> = detections.into_iter().map(Some).collect();
    let mut clusters = Vec::new();

    for i in 0..n {
        let Some(seed) = slots[i].take() else { continue };
        let seed_text = seed.text.clone();
        let mut members = vec![seed];

        for slot in slots.iter_mut().skip(i + 1) {
            let claim = match slot {
                Some(candidate) => similarity_ratio(&seed_text, &candidate.text) >= threshold,
                None => false,
            };
            if claim {
                if let Some(candidate) = slot.take() {
                    members.push(candidate);
                }
            }
        }

        clusters.push(TextCluster { members });
    }

    tracing::debug!(clusters = clusters.len(), "Clustering complete");
    clusters
}

/// Group bare strings with the same greedy seed-anchored pass used for
/// detections. Serves callers that carry no frame back-references, like the
/// on-demand correction endpoint.
pub fn group_similar_texts(texts: &[String], threshold: f64) -> Vec<Vec<String>> {
    let n = texts.len();
    let mut processed = vec![false; n];
    let mut groups = Vec::new();

    for i in 0..n {
        if processed[i] {
            continue;
        }
        processed[i] = true;
        let mut group = vec![texts[i].clone()];
        for j in (i + 1)..n {
            if !processed[j] && similarity_ratio(&texts[i], &texts[j]) >= threshold {
                processed[j] = true;
                group.push(texts[j].clone());
            }
        }
        groups.push(group);
    }

    groups
}
