//! Padded face crops for unknown-cluster thumbnails.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Fraction of the face width/height added on each side of the crop.
pub const DEFAULT_PAD_FRACTION: f32 = 0.2;

/// Side length of the square thumbnail written for new clusters.
pub const DEFAULT_PASSPORT_SIZE: u32 = 300;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CropError {
    #[error("padded crop ({left}, {top})-({right}, {bottom}) outside {frame_width}x{frame_height} frame")]
    OutOfBounds {
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("face box has no area inside the frame")]
    Empty,
}

/// Integer pixel rectangle fully inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Expand `bbox` by `pad_fraction` of its size on every side, clamped to the frame.
///
/// Fails with [`CropError::OutOfBounds`] when the padded coordinates are not
/// finite or the padded box does not overlap the frame at all.
pub fn padded_rect(
    bbox: &BoundingBox,
    frame_width: u32,
    frame_height: u32,
    pad_fraction: f32,
) -> Result<CropRect, CropError> {
    let pad_x = (bbox.width * pad_fraction).floor();
    let pad_y = (bbox.height * pad_fraction).floor();

    let left = bbox.x - pad_x;
    let top = bbox.y - pad_y;
    let right = bbox.right() + pad_x;
    let bottom = bbox.bottom() + pad_y;

    clamp(left, top, right, bottom, frame_width, frame_height).ok_or(CropError::OutOfBounds {
        left,
        top,
        right,
        bottom,
        frame_width,
        frame_height,
    })
}

/// The face box itself, clamped to the frame.
pub fn face_rect(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> Result<CropRect, CropError> {
    clamp(bbox.x, bbox.y, bbox.right(), bbox.bottom(), frame_width, frame_height)
        .ok_or(CropError::Empty)
}

fn clamp(left: f32, top: f32, right: f32, bottom: f32, width: u32, height: u32) -> Option<CropRect> {
    if ![left, top, right, bottom].iter().all(|v| v.is_finite()) {
        return None;
    }

    let x0 = left.floor().clamp(0.0, width as f32) as u32;
    let y0 = top.floor().clamp(0.0, height as f32) as u32;
    let x1 = right.ceil().clamp(0.0, width as f32) as u32;
    let y1 = bottom.ceil().clamp(0.0, height as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(CropRect {
        x: x0,
        y: y0,
        width: x1 - x0,
        height: y1 - y0,
    })
}

/// Cut the padded face region out of `frame`.
///
/// A rejected padded box falls back to the unpadded face box; only a face
/// box with no area in the frame is an error.
pub fn crop_face(frame: &RgbImage, bbox: &BoundingBox, pad_fraction: f32) -> Result<RgbImage, CropError> {
    let (width, height) = frame.dimensions();

    let rect = match padded_rect(bbox, width, height, pad_fraction) {
        Ok(rect) => rect,
        Err(err @ CropError::OutOfBounds { .. }) => {
            tracing::warn!(error = %err, "padded crop rejected, using face box");
            face_rect(bbox, width, height)?
        }
        Err(err) => return Err(err),
    };

    Ok(imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Resize a crop to a `size`×`size` thumbnail. `size == 0` keeps the crop as-is.
pub fn passport(crop: RgbImage, size: u32) -> RgbImage {
    if size == 0 || crop.dimensions() == (size, size) {
        return crop;
    }
    imageops::resize(&crop, size, size, FilterType::Triangle)
}
