//! Enrollment of a single identity from a still image.

use crate::backend::FaceBackend;
use crate::store::{EncodingStore, StoreError};
use crate::types::Embedding;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid identity name {0:?}")]
    InvalidName(String),
    #[error("no face found in the enrollment image")]
    NoFaceFound,
    #[error("failed to read enrollment image {path}: {reason}")]
    Image { path: String, reason: String },
    #[error("face backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reject names that are empty or would escape the photos directory.
pub fn validate_name(name: &str) -> Result<(), EnrollError> {
    let trimmed = name.trim();
    let bad = trimmed.is_empty()
        || trimmed != name
        || name.contains(['/', '\\', '\0'])
        || name == "."
        || name == ".."
        || name.eq_ignore_ascii_case(crate::types::UNKNOWN_LABEL);
    if bad {
        return Err(EnrollError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Extract one embedding from `image` and add it to `store` under `name`.
///
/// When several faces are present the backend's first (most confident) one
/// wins. With no face the store is left untouched.
pub fn enroll_image<B: FaceBackend>(
    store: &mut EncodingStore,
    backend: &mut B,
    name: &str,
    image: &RgbImage,
) -> Result<Embedding, EnrollError> {
    validate_name(name)?;

    let locations = backend.locate(image).map_err(|e| EnrollError::Backend(Box::new(e)))?;
    let Some(&best) = locations.first() else {
        tracing::warn!(name, "enrollment image contains no face");
        return Err(EnrollError::NoFaceFound);
    };
    if locations.len() > 1 {
        tracing::info!(name, faces = locations.len(), "several faces found; using the most confident");
    }

    let embedding = backend
        .encode(image, &[best])
        .map_err(|e| EnrollError::Backend(Box::new(e)))?
        .into_iter()
        .next()
        .ok_or(EnrollError::NoFaceFound)?;

    store.add(name, embedding.clone())?;
    tracing::info!(name, dims = embedding.len(), "enrolled");
    Ok(embedding)
}

/// Load the image at `path` and enroll it.
pub fn enroll_file<B: FaceBackend>(
    store: &mut EncodingStore,
    backend: &mut B,
    name: &str,
    path: &Path,
) -> Result<Embedding, EnrollError> {
    let image = image::open(path)
        .map_err(|e| EnrollError::Image {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
        .to_rgb8();
    enroll_image(store, backend, name, &image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FakeBackend;
    use crate::types::FaceLocation;

    fn loc(n: u32) -> FaceLocation {
        FaceLocation { top: n, right: n + 10, bottom: n + 10, left: n }
    }

    #[test]
    fn test_no_face_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.json");
        let mut store = EncodingStore::open(&path).unwrap();
        store.add("Alice", Embedding::new(vec![1.0, 0.0])).unwrap();
        let before = std::fs::read(&path).unwrap();

        let mut backend = FakeBackend::with_frames(vec![vec![]]);
        let err = enroll_image(&mut store, &mut backend, "Carol", &RgbImage::new(4, 4)).unwrap_err();

        assert!(matches!(err, EnrollError::NoFaceFound));
        assert!(!store.contains("Carol"));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_enroll_uses_first_face() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EncodingStore::open(dir.path().join("faces.json")).unwrap();
        let mut backend = FakeBackend::with_frames(vec![vec![
            (loc(0), Embedding::new(vec![0.1, 0.2])),
            (loc(40), Embedding::new(vec![0.9, 0.9])),
        ]]);

        let embedding = enroll_image(&mut store, &mut backend, "Carol", &RgbImage::new(4, 4)).unwrap();
        assert_eq!(embedding, Embedding::new(vec![0.1, 0.2]));
        assert_eq!(store.get("Carol"), Some(&embedding));
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["", " ", "../x", "a/b", "Unknown", " padded"] {
            assert!(validate_name(name).is_err(), "{name:?} should be rejected");
        }
        assert!(validate_name("Mary Jane").is_ok());
    }

    #[test]
    fn test_enroll_file_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EncodingStore::open(dir.path().join("faces.json")).unwrap();
        let mut backend = FakeBackend::default();
        let err = enroll_file(&mut store, &mut backend, "Carol", &dir.path().join("nope.jpg")).unwrap_err();
        assert!(matches!(err, EnrollError::Image { .. }));
        assert!(store.is_empty());
    }
}
