use serde::{Deserialize, Serialize};

/// Label shown for a face that matched no enrolled identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Face bounding box as pixel edges, in the coordinate space of the frame
/// it was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceLocation {
    /// Multiply every edge by `factor`, mapping a box from a downscaled
    /// analysis frame back onto the full-resolution frame.
    pub fn scaled(&self, factor: u32) -> Self {
        Self {
            top: self.top.saturating_mul(factor),
            right: self.right.saturating_mul(factor),
            bottom: self.bottom.saturating_mul(factor),
            left: self.left.saturating_mul(factor),
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Face embedding vector. Dimensionality is fixed by the backend that
/// produced it (512 for ArcFace, 128 for dlib-style encoders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Only meaningful for equal lengths; callers check `len()` first.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// An enrolled identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownFace {
    pub name: String,
    pub embedding: Embedding,
}

/// Face produced by the backend for one frame.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub location: FaceLocation,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the known gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Name of the matched identity, `None` when nothing was close enough.
    pub name: Option<String>,
    /// Distance to the nearest gallery entry (`None` for an empty gallery).
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn unknown(distance: Option<f32>) -> Self {
        Self { name: None, distance }
    }

    pub fn is_match(&self) -> bool {
        self.name.is_some()
    }

    /// Display label: the matched name or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// A face with its assigned label, ready for annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedFace {
    pub location: FaceLocation,
    pub label: String,
}

impl RecognizedFace {
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.3, 0.4]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_3_4_5() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_location_scaled() {
        let loc = FaceLocation { top: 10, right: 40, bottom: 50, left: 5 };
        let up = loc.scaled(4);
        assert_eq!(up, FaceLocation { top: 40, right: 160, bottom: 200, left: 20 });
        assert_eq!(up.width(), 140);
        assert_eq!(up.height(), 160);
    }

    #[test]
    fn test_match_result_label() {
        let hit = MatchResult { name: Some("Alice".into()), distance: Some(0.1) };
        assert_eq!(hit.label(), "Alice");
        assert_eq!(MatchResult::unknown(None).label(), UNKNOWN_LABEL);
    }

    #[test]
    fn test_embedding_serializes_as_plain_array() {
        let e = Embedding::new(vec![1.0, 2.5]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[1.0,2.5]");
    }
}
