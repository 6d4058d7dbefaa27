//! Frame Source Layer
//!
//! Delivers camera frames to the processing loop. Live camera capture is not
//! part of this crate; the demo replays a still image (or a blank canvas) once
//! per scripted frame.

pub mod frame;

use anyhow::{Context, Result};
use image::RgbImage;
use std::path::Path;
use tracing::info;

pub use frame::Frame;

/// Frame source configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Width of the blank canvas when no image is given
    pub width: u32,
    /// Height of the blank canvas when no image is given
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Replays a single image as a stream of frames
pub struct StillFrameSource {
    image: RgbImage,
    next_index: u64,
    frame_count: u64,
}

impl StillFrameSource {
    /// Blank canvas source
    pub fn blank(config: &CaptureConfig, frame_count: u64) -> Self {
        Self {
            image: RgbImage::new(config.width, config.height),
            next_index: 0,
            frame_count,
        }
    }

    /// Source that repeats the image at `path`
    pub fn from_image(path: &Path, frame_count: u64) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("Failed to load frame image: {:?}", path))?
            .into_rgb8();

        info!(
            "Replaying {:?} ({}x{}) for {} frames",
            path,
            image.width(),
            image.height(),
            frame_count
        );

        Ok(Self {
            image,
            next_index: 0,
            frame_count,
        })
    }
}

impl Iterator for StillFrameSource {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.next_index >= self.frame_count {
            return None;
        }

        let frame = Frame::new(self.next_index, self.image.clone());
        self.next_index += 1;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_source_yields_indexed_frames() {
        let source = StillFrameSource::blank(&CaptureConfig::default(), 3);
        let indices: Vec<u64> = source.map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_missing_image_is_error() {
        let result = StillFrameSource::from_image(Path::new("/nonexistent/frame.png"), 1);
        assert!(result.is_err());
    }
}
