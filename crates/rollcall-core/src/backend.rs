//! Detection and embedding capability consumed by recognition and enrollment.

use crate::types::{Embedding, FaceLocation};
use image::RgbImage;

/// A face detector paired with an embedding extractor.
///
/// `locate` returns boxes ordered by detector confidence, best first.
/// `encode` returns one embedding per box, in the order given.
pub trait FaceBackend {
    type Error: std::error::Error + Send + Sync + 'static;

    fn locate(&mut self, image: &RgbImage) -> Result<Vec<FaceLocation>, Self::Error>;

    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[FaceLocation],
    ) -> Result<Vec<Embedding>, Self::Error>;
}
