//! Nearest-neighbour gallery matching
//!
//! Pure and stateless: every rendered frame re-runs the matcher against the
//! current gallery, so gallery edits show up on the next frame without any
//! embedding being recomputed.

use crate::storage::GalleryEntry;

use super::types::{DetectionSnapshot, Embedding, MatchResult};

/// L2 distance below which two embeddings are the same identity.
/// Tied to the embedding model; change both together.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    threshold: f32,
}

impl Matcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Classify every detection in the snapshot against the gallery
    pub fn match_snapshot(
        &self,
        snapshot: &DetectionSnapshot,
        gallery: &[GalleryEntry],
    ) -> Vec<MatchResult> {
        snapshot
            .detections
            .iter()
            .map(|d| MatchResult {
                bbox: d.bbox,
                is_match: self.is_known(&d.embedding, gallery),
            })
            .collect()
    }

    /// An empty gallery never matches
    pub fn is_known(&self, embedding: &Embedding, gallery: &[GalleryEntry]) -> bool {
        nearest_distance(embedding, gallery).is_some_and(|d| d < self.threshold)
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

/// Minimum distance from `embedding` to any gallery entry, `None` for an empty gallery
pub fn nearest_distance(embedding: &Embedding, gallery: &[GalleryEntry]) -> Option<f32> {
    gallery
        .iter()
        .map(|entry| embedding.distance(&entry.embedding))
        .min_by(|a, b| a.total_cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::fixtures::{basis, detection_at};
    use crate::pipeline::types::EMBEDDING_DIM;
    use crate::storage::fixtures::entry_with;

    fn snapshot_of(embeddings: Vec<Embedding>) -> DetectionSnapshot {
        let mut snapshot = DetectionSnapshot::empty();
        snapshot.detections = embeddings
            .into_iter()
            .enumerate()
            .map(|(i, e)| detection_at(i as f32 * 30.0, 0.0, e))
            .collect();
        snapshot
    }

    #[test]
    fn test_exact_embedding_matches() {
        for size in 1..=5 {
            let gallery: Vec<_> = (0..size).map(|i| entry_with(basis(i))).collect();
            let target = basis(size - 1);
            let results = Matcher::default().match_snapshot(&snapshot_of(vec![target]), &gallery);
            assert_eq!(results.len(), 1);
            assert!(results[0].is_match, "gallery size {size}");
        }
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let snapshot = snapshot_of(vec![basis(0), basis(1), basis(7)]);
        // Even an absurdly permissive threshold cannot match against nothing
        let matcher = Matcher::new(f32::INFINITY);
        let results = matcher.match_snapshot(&snapshot, &[]);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !r.is_match));
        assert_eq!(nearest_distance(&basis(0), &[]), None);
    }

    #[test]
    fn test_small_perturbation_matches() {
        let gallery = vec![entry_with(basis(0))];
        let mut v = basis(0).as_slice().to_vec();
        v[5] += 0.01;
        let query = Embedding::new(v).unwrap();

        let d = nearest_distance(&query, &gallery).unwrap();
        assert!((d - 0.01).abs() < 1e-4);
        assert!(Matcher::default().is_known(&query, &gallery));
    }

    #[test]
    fn test_large_perturbation_does_not_match() {
        let gallery = vec![entry_with(basis(0))];
        let v: Vec<f32> = basis(0).as_slice().iter().map(|x| x + 0.1).collect();
        let query = Embedding::new(v).unwrap();

        let d = nearest_distance(&query, &gallery).unwrap();
        let expected = (EMBEDDING_DIM as f32 * 0.01).sqrt();
        assert!((d - expected).abs() < 1e-3, "distance {d}");
        assert!(d >= DEFAULT_MATCH_THRESHOLD);
        assert!(!Matcher::default().is_known(&query, &gallery));
    }

    #[test]
    fn test_nearest_of_several_entries_decides() {
        // Far entry first, near entry second: only the minimum matters
        let gallery = vec![entry_with(basis(3)), entry_with(basis(0))];
        let results = Matcher::default().match_snapshot(&snapshot_of(vec![basis(0), basis(9)]), &gallery);
        assert!(results[0].is_match);
        assert!(!results[1].is_match);
    }

    #[test]
    fn test_threshold_is_strict() {
        // basis vectors are sqrt(2) apart
        let gallery = vec![entry_with(basis(0))];
        let at_threshold = Matcher::new(2f32.sqrt());
        assert!(!at_threshold.is_known(&basis(1), &gallery));
        assert!(Matcher::new(1.5).is_known(&basis(1), &gallery));
    }

    #[test]
    fn test_results_keep_detection_boxes_in_order() {
        let snapshot = snapshot_of(vec![basis(0), basis(1)]);
        let results = Matcher::default().match_snapshot(&snapshot, &[]);
        assert_eq!(results[0].bbox, snapshot.detections[0].bbox);
        assert_eq!(results[1].bbox, snapshot.detections[1].bbox);
    }
}
