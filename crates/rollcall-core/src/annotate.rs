//! Overlay of recognition results onto full-resolution frames.

use crate::types::{FaceLocation, RecognizedFace};
use image::{Rgb, RgbImage};
use std::convert::Infallible;

/// Default inverse of the analysis downscale (frames are analyzed at 0.25×).
pub const DEFAULT_DOWNSCALE: u32 = 4;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_HEIGHT: u32 = 35;

/// Drawing surface for face overlays.
pub trait Canvas {
    type Error;

    /// Draw one face box with its label, in the canvas' own coordinates.
    fn draw_face(&mut self, location: FaceLocation, label: &str) -> Result<(), Self::Error>;
}

/// Scales analysis-frame boxes onto the display frame.
#[derive(Debug, Clone, Copy)]
pub struct Annotator {
    scale: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNSCALE)
    }
}

impl Annotator {
    /// `scale` is the factor the analysis frame was shrunk by.
    pub fn new(scale: u32) -> Self {
        Self { scale: scale.max(1) }
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Map a box from analysis coordinates to display coordinates.
    pub fn to_display(&self, location: FaceLocation) -> FaceLocation {
        location.scaled(self.scale)
    }

    pub fn annotate<C: Canvas>(&self, canvas: &mut C, faces: &[RecognizedFace]) -> Result<(), C::Error> {
        for face in faces {
            canvas.draw_face(self.to_display(face.location), &face.label)?;
        }
        Ok(())
    }
}

/// Box outline plus a filled label strip along the bottom edge.
///
/// Text is not rasterized; the strip marks where the label belongs.
impl Canvas for RgbImage {
    type Error = Infallible;

    fn draw_face(&mut self, location: FaceLocation, _label: &str) -> Result<(), Infallible> {
        let (w, h) = self.dimensions();
        if w == 0 || h == 0 {
            return Ok(());
        }
        let left = location.left.min(w - 1);
        let right = location.right.min(w - 1);
        let top = location.top.min(h - 1);
        let bottom = location.bottom.min(h - 1);
        if left > right || top > bottom {
            return Ok(());
        }

        for t in 0..BOX_THICKNESS {
            for x in left..=right {
                put(self, x, top.saturating_add(t));
                put(self, x, bottom.saturating_sub(t));
            }
            for y in top..=bottom {
                put(self, left.saturating_add(t), y);
                put(self, right.saturating_sub(t), y);
            }
        }

        let strip_top = bottom.saturating_sub(LABEL_HEIGHT).max(top);
        for y in strip_top..=bottom {
            for x in left..=right {
                put(self, x, y);
            }
        }
        Ok(())
    }
}

fn put(img: &mut RgbImage, x: u32, y: u32) {
    if x < img.width() && y < img.height() {
        img.put_pixel(x, y, BOX_COLOR);
    }
}
