//! Frame data structures for camera content

use image::RgbImage;
use std::time::Instant;

use crate::geometry::Rect;

/// A single camera frame handed to the detector
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number within the session
    pub index: u64,
    /// RGB pixel data, already upright. Detection boxes use these pixel coordinates.
    pub image: RgbImage,
    /// Timestamp when frame was delivered
    pub timestamp: Instant,
}

impl Frame {
    /// Create a new frame stamped with the current time
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self {
            index,
            image,
            timestamp: Instant::now(),
        }
    }

    /// Create a blank frame of the given size
    pub fn blank(index: u64, width: u32, height: u32) -> Self {
        Self::new(index, RgbImage::new(width, height))
    }

    /// Frame dimensions, the same space `crop` clamps against
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Crop an object out of the frame.
    ///
    /// The box is clamped to the image; returns `None` if nothing is left.
    pub fn crop(&self, bounds: &Rect) -> Option<RgbImage> {
        let (width, height) = self.image.dimensions();
        let clamped = bounds.clamp_to(width as f32, height as f32);
        if clamped.is_empty() {
            return None;
        }

        let x = clamped.left.floor() as u32;
        let y = clamped.top.floor() as u32;
        let w = (clamped.right.ceil() as u32).min(width).saturating_sub(x);
        let h = (clamped.bottom.ceil() as u32).min(height).saturating_sub(y);
        if w == 0 || h == 0 {
            return None;
        }

        Some(image::imageops::crop_imm(&self.image, x, y, w, h).to_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_inside_frame() {
        let frame = Frame::blank(0, 64, 48);
        let crop = frame.crop(&Rect::new(10.0, 10.0, 30.0, 20.0)).unwrap();
        assert_eq!(crop.dimensions(), (20, 10));
    }

    #[test]
    fn test_crop_is_clamped() {
        let frame = Frame::blank(0, 64, 48);
        let crop = frame.crop(&Rect::new(-10.0, 40.0, 100.0, 60.0)).unwrap();
        assert_eq!(crop.dimensions(), (64, 8));
    }

    #[test]
    fn test_crop_outside_frame() {
        let frame = Frame::blank(0, 64, 48);
        assert!(frame.crop(&Rect::new(70.0, 50.0, 90.0, 60.0)).is_none());
    }

    #[test]
    fn test_crop_matches_dimensions() {
        let frame = Frame::blank(0, 480, 640);
        let (width, height) = frame.dimensions();
        let crop = frame.crop(&Rect::new(0.0, 0.0, width as f32 + 50.0, height as f32 + 50.0)).unwrap();
        assert_eq!(crop.dimensions(), (480, 640));
    }
}
