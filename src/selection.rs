//! Multi-object tap selection
//!
//! Remembers which tracked objects were present in the latest frame so a
//! selection request can only pick an object that is actually visible.

use image::RgbImage;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::capture::Frame;
use crate::detection::{Detection, TrackingId};
use crate::geometry::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionState {
    #[default]
    NotSelected,
    Selected(TrackingId),
}

impl SelectionState {
    pub fn tracking_id(&self) -> Option<TrackingId> {
        match *self {
            SelectionState::NotSelected => None,
            SelectionState::Selected(tracking_id) => Some(tracking_id),
        }
    }
}

/// Live objects of the last frame plus the current selection
#[derive(Debug, Default)]
pub struct SelectionTracker {
    live: HashMap<TrackingId, Rect>,
    state: SelectionState,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    /// Replace the live set with the tracked detections of the current frame.
    ///
    /// IDs missing from the frame are pruned. The selection itself is kept.
    pub fn observe(&mut self, detections: &[Detection]) {
        let before = self.live.len();
        self.live = detections
            .iter()
            .filter_map(|d| d.tracking_id.map(|id| (id, d.bounding_box)))
            .collect();

        if self.live.len() != before {
            debug!("{} live objects", self.live.len());
        }
    }

    pub fn is_live(&self, tracking_id: TrackingId) -> bool {
        self.live.contains_key(&tracking_id)
    }

    /// Select a live object and return its crop from `frame`, clamped to the frame
    pub fn select(&mut self, tracking_id: TrackingId, frame: &Frame) -> Option<RgbImage> {
        let bounds = self.live.get(&tracking_id)?;
        let crop = frame.crop(bounds)?;

        info!("Selected object {}", tracking_id);
        self.state = SelectionState::Selected(tracking_id);
        Some(crop)
    }

    pub fn clear(&mut self) {
        if let SelectionState::Selected(tracking_id) = self.state {
            info!("Cleared selection of object {}", tracking_id);
        }
        self.state = SelectionState::NotSelected;
    }
}
