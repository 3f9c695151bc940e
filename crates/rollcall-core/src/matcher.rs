//! Nearest-identity matching in embedding space.

use crate::types::{Embedding, KnownFace, MatchResult};

/// Default acceptance threshold in the Euclidean-distance convention.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[KnownFace], threshold: f32) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// Picks the gallery entry with the smallest distance; ties go to the
/// earliest entry. The winner is only accepted when its distance is
/// strictly below the threshold. Entries whose length differs from the
/// probe are never candidates.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[KnownFace], threshold: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;
        let mut mismatched = 0usize;

        for (i, known) in gallery.iter().enumerate() {
            if known.embedding.len() != probe.len() {
                mismatched += 1;
                continue;
            }
            let dist = probe.euclidean_distance(&known.embedding);
            // Strict comparison keeps the first of equal distances.
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((i, dist));
            }
        }

        if mismatched > 0 {
            tracing::warn!(
                probe_dims = probe.len(),
                skipped = mismatched,
                "gallery entries with a different embedding length were not compared"
            );
        }

        match best {
            Some((idx, dist)) if dist < threshold => MatchResult {
                name: Some(gallery[idx].name.clone()),
                distance: Some(dist),
            },
            Some((_, dist)) => MatchResult::unknown(Some(dist)),
            None => MatchResult::unknown(None),
        }
    }
}
