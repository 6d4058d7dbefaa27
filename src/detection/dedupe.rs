//! Overlap deduplication
//!
//! Greedy, order-preserving filter: a detection is kept only if it does not
//! overlap any detection already kept. The result depends on input order and
//! the first of two overlapping boxes always wins.

use tracing::debug;

use crate::config::ConfigError;
use crate::geometry::Rect;

use super::Detection;

/// Default IoU threshold
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.1;
/// Default overlap factor for the fractional policy
pub const DEFAULT_OVERLAP_FACTOR: f32 = 0.2;

/// Overlap test between two boxes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlapPolicy {
    /// Overlap when `area(A∩B) / area(A∪B) >= threshold`
    Iou { threshold: f32 },
    /// Overlap when `area(A∩B) >= overlap_factor * min(area(A), area(B))`
    Fraction { overlap_factor: f32 },
}

impl OverlapPolicy {
    /// IoU policy with a checked threshold
    pub fn iou(threshold: f32) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidIouThreshold(threshold));
        }
        Ok(Self::Iou { threshold })
    }

    /// Fractional policy with a checked overlap factor
    pub fn fraction(overlap_factor: f32) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&overlap_factor) {
            return Err(ConfigError::InvalidOverlapFactor(overlap_factor));
        }
        Ok(Self::Fraction { overlap_factor })
    }

    /// Whether two boxes count as the same object
    pub fn overlaps(&self, a: &Rect, b: &Rect) -> bool {
        // Zero-area intersections never count, even with a zero threshold
        if !a.intersects(b) {
            return false;
        }

        match *self {
            OverlapPolicy::Iou { threshold } => a.intersection_over_union(b) >= threshold,
            OverlapPolicy::Fraction { overlap_factor } => a.overlap_fraction(b) >= overlap_factor,
        }
    }
}

impl Default for OverlapPolicy {
    fn default() -> Self {
        Self::Iou {
            threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

/// Removes near-duplicate detections from a frame
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    policy: OverlapPolicy,
}

impl Deduplicator {
    /// Create a deduplicator, validating the policy parameters
    pub fn new(policy: OverlapPolicy) -> Result<Self, ConfigError> {
        let policy = match policy {
            OverlapPolicy::Iou { threshold } => OverlapPolicy::iou(threshold)?,
            OverlapPolicy::Fraction { overlap_factor } => OverlapPolicy::fraction(overlap_factor)?,
        };
        Ok(Self { policy })
    }

    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }

    /// Keep detections that do not overlap an earlier kept detection
    pub fn dedupe(&self, detections: &[Detection]) -> Vec<Detection> {
        let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());

        for detection in detections {
            let duplicate = kept
                .iter()
                .any(|accepted| self.policy.overlaps(&accepted.bounding_box, &detection.bounding_box));

            if !duplicate {
                kept.push(detection.clone());
            }
        }

        if kept.len() != detections.len() {
            debug!("Dropped {} overlapping detections", detections.len() - kept.len());
        }

        kept
    }
}
