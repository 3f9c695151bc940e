//! One analysis pass: detect, encode and match every face in a frame.

use crate::backend::FaceBackend;
use crate::matcher::Matcher;
use crate::types::{DetectedFace, KnownFace, RecognizedFace};
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Shrink a display frame by `factor` in each dimension for analysis.
pub fn downscale(frame: &RgbImage, factor: u32) -> RgbImage {
    let factor = factor.max(1);
    if factor == 1 {
        return frame.clone();
    }
    let w = (frame.width() / factor).max(1);
    let h = (frame.height() / factor).max(1);
    imageops::resize(frame, w, h, FilterType::Triangle)
}

/// Detect and embed all faces in `image`.
pub fn detect_faces<B: FaceBackend>(backend: &mut B, image: &RgbImage) -> Result<Vec<DetectedFace>, B::Error> {
    let locations = backend.locate(image)?;
    if locations.is_empty() {
        return Ok(Vec::new());
    }
    let embeddings = backend.encode(image, &locations)?;
    if embeddings.len() != locations.len() {
        tracing::warn!(
            boxes = locations.len(),
            embeddings = embeddings.len(),
            "backend returned a different number of embeddings than boxes"
        );
    }
    Ok(locations
        .into_iter()
        .zip(embeddings)
        .map(|(location, embedding)| DetectedFace { location, embedding })
        .collect())
}

/// Label every face in an analysis frame against the gallery.
///
/// Locations stay in the analysis frame's coordinate space.
pub fn recognize_frame<B, M>(
    backend: &mut B,
    matcher: &M,
    gallery: &[KnownFace],
    threshold: f32,
    analysis_frame: &RgbImage,
) -> Result<Vec<RecognizedFace>, B::Error>
where
    B: FaceBackend,
    M: Matcher + ?Sized,
{
    let faces = detect_faces(backend, analysis_frame)?;
    Ok(label_faces(matcher, gallery, threshold, faces))
}

/// Match already-embedded faces against the gallery.
pub fn label_faces<M>(matcher: &M, gallery: &[KnownFace], threshold: f32, faces: Vec<DetectedFace>) -> Vec<RecognizedFace>
where
    M: Matcher + ?Sized,
{
    faces
        .into_iter()
        .map(|face| {
            let result = matcher.compare(&face.embedding, gallery, threshold);
            tracing::trace!(label = result.label(), distance = ?result.distance, "face matched");
            RecognizedFace {
                location: face.location,
                label: result.label().to_string(),
            }
        })
        .collect()
}
