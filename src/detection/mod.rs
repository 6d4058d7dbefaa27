//! Object Detection Layer
//!
//! Detection records produced by the external detector, the detector
//! interface, and the overlap deduplicator applied to every frame.
//! The detector itself is external; `ScriptedDetector` replays recorded output.

pub mod dedupe;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::capture::Frame;
use crate::geometry::Rect;

pub use dedupe::{Deduplicator, OverlapPolicy};

/// Stable identifier the detector assigns to one physical object
pub type TrackingId = i32;

/// Classification label attached by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// Label text
    pub text: String,
    /// Confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Index in the detector's label map
    pub index: i32,
}

/// A single detected object in a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Bounding box in frame coordinates
    pub bounding_box: Rect,
    /// Tracking ID, absent when the detector lost track
    #[serde(default)]
    pub tracking_id: Option<TrackingId>,
    /// Ordered labels, possibly empty
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl Detection {
    pub fn new(bounding_box: Rect, tracking_id: Option<TrackingId>) -> Self {
        Self {
            bounding_box,
            tracking_id,
            labels: Vec::new(),
        }
    }

    /// True when the detector attached at least one label
    pub fn has_valid_labels(&self) -> bool {
        !self.labels.is_empty()
    }
}

/// Detector failure for a single frame
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("detector failed on frame {frame}: {reason}")]
    Failed { frame: u64, reason: String },
}

/// Detector interface, invoked once per frame
pub trait ObjectDetector {
    /// Detector name for logging
    fn name(&self) -> &'static str;

    /// Detect objects in a frame
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError>;
}

/// One frame of a detection script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedFrame {
    /// Frame index the detections belong to
    pub index: u64,
    /// Detections in detector order
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Simulate a detector failure on this frame
    #[serde(default)]
    pub fail: bool,
}

/// Detector that replays recorded detections by frame index
pub struct ScriptedDetector {
    frames: HashMap<u64, ScriptedFrame>,
    frame_count: u64,
}

impl ScriptedDetector {
    /// Build from in-memory script entries
    pub fn new(script: Vec<ScriptedFrame>) -> Self {
        let frame_count = script.iter().map(|f| f.index.saturating_add(1)).max().unwrap_or(0);
        let frames = script.into_iter().map(|f| (f.index, f)).collect();
        Self { frames, frame_count }
    }

    /// Load a JSON detection script
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read detection script: {:?}", path))?;
        let script: Vec<ScriptedFrame> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid detection script: {:?}", path))?;

        info!("Loaded detection script with {} entries from {:?}", script.len(), path);
        Ok(Self::new(script))
    }

    /// Number of frames the script covers (highest index + 1)
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl ObjectDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let Some(entry) = self.frames.get(&frame.index) else {
            return Ok(Vec::new());
        };

        if entry.fail {
            return Err(DetectError::Failed {
                frame: frame.index,
                reason: "scripted failure".to_string(),
            });
        }

        debug!("Frame {}: {} scripted detections", frame.index, entry.detections.len());
        Ok(entry.detections.clone())
    }
}
