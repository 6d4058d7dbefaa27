//! Frame processor
//!
//! Runs once per frame on the frame thread: detection, duplicate filtering,
//! reticle confirmation (prominent mode) or tap selection (multi mode), and
//! hand-off of confirmed objects to the classification worker. Results from
//! the worker are merged at the start of the next frame.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::capture::Frame;
use crate::classification::{CategoryResult, ClassificationEvent, ClassificationWorker, Classifier};
use crate::config::AppConfig;
use crate::confirmation::{ConfirmationController, ConfirmationEvent, ConfirmationState, Observation};
use crate::detection::{Deduplicator, Detection, ObjectDetector, TrackingId};
use crate::geometry::Rect;
use crate::selection::{SelectionState, SelectionTracker};

/// Upper bound for one wait inside `flush`
const FLUSH_POLL: Duration = Duration::from_millis(50);

/// Processing mode, chosen once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorMode {
    /// Single prominent object confirmed on the reticle
    Prominent {
        classification: bool,
        /// Skip objects that carry no detector labels
        require_labels: bool,
    },
    /// Every object, classified when selected
    Multi { classification: bool },
}

impl DetectorMode {
    pub fn classification_enabled(&self) -> bool {
        match *self {
            DetectorMode::Prominent { classification, .. } => classification,
            DetectorMode::Multi { classification } => classification,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DetectorMode::Prominent { .. } => "prominent",
            DetectorMode::Multi { .. } => "multi",
        }
    }
}

/// Square target region centred on the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reticle {
    pub outer_radius: f32,
}

impl Reticle {
    pub fn new(outer_radius: f32) -> Self {
        Self { outer_radius }
    }

    /// Reticle box for a frame of the given size
    pub fn bounds(&self, width: u32, height: u32) -> Rect {
        Rect::centered(width as f32 / 2.0, height as f32 / 2.0, self.outer_radius)
    }

    /// True when `bounds` shares a positive area with the reticle
    pub fn overlaps(&self, bounds: &Rect, width: u32, height: u32) -> bool {
        self.bounds(width, height).intersects(bounds)
    }
}

/// Coarse workflow stage shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    /// No valid object in view
    Detecting,
    /// Object in view but off the reticle
    Detected,
    Confirming,
    Confirmed,
}

/// Everything the presentation layer needs for one frame
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_index: u64,
    /// Deduplicated detections in detector order
    pub detections: Vec<Detection>,
    pub confirmation: ConfirmationState,
    pub workflow: WorkflowState,
    /// Label of the active object, once classified
    pub label: Option<String>,
    /// Multi mode only
    pub selection: Option<SelectionState>,
    /// Classification results merged this frame
    pub events: Vec<ClassificationEvent>,
}

/// Per-frame coordinator owning the state machine and the classification worker
pub struct FrameProcessor {
    mode: DetectorMode,
    deduplicator: Deduplicator,
    confirmation: ConfirmationController,
    reticle: Reticle,
    selection: SelectionTracker,
    worker: Option<ClassificationWorker>,
}

impl FrameProcessor {
    pub fn new(
        mode: DetectorMode,
        deduplicator: Deduplicator,
        confirmation: ConfirmationController,
        reticle: Reticle,
        worker: Option<ClassificationWorker>,
    ) -> Self {
        Self {
            mode,
            deduplicator,
            confirmation,
            reticle,
            selection: SelectionTracker::new(),
            worker,
        }
    }

    /// Build from validated settings.
    ///
    /// A worker is only started when the mode enables classification and a
    /// classifier is supplied.
    pub fn from_config(config: &AppConfig, classifier: Option<Arc<dyn Classifier>>) -> anyhow::Result<Self> {
        config.validate()?;

        let mode = config.detector.mode();
        let deduplicator = Deduplicator::new(config.dedupe.policy()?)?;
        let confirmation = ConfirmationController::new(config.confirmation.duration()?);
        let reticle = Reticle::new(config.reticle.radius()?);

        let worker = match (mode.classification_enabled(), classifier) {
            (true, Some(classifier)) => Some(ClassificationWorker::new(
                classifier,
                config.classification.worker_config()?,
            )?),
            (true, None) => {
                warn!("Classification enabled but no classifier available, continuing without");
                None
            }
            (false, _) => None,
        };

        info!(
            "Frame processor ready in {} mode, overlap policy {:?}",
            mode.name(),
            deduplicator.policy()
        );
        Ok(Self::new(mode, deduplicator, confirmation, reticle, worker))
    }

    pub fn mode(&self) -> DetectorMode {
        self.mode
    }

    /// Run detection on `frame` and advance all per-frame state
    pub fn process<D: ObjectDetector + ?Sized>(&mut self, detector: &mut D, frame: &Frame) -> FrameReport {
        let events = self.merge_events();

        let detections = match detector.detect(frame) {
            Ok(detections) => self.deduplicator.dedupe(&detections),
            Err(e) => {
                warn!("Detector '{}' failed: {}", detector.name(), e);
                self.confirmation.reset();
                if matches!(self.mode, DetectorMode::Multi { .. }) {
                    self.selection.observe(&[]);
                }
                return self.report(frame, Vec::new(), WorkflowState::Detecting, events);
            }
        };

        debug!("Frame {}: {} objects after dedupe", frame.index, detections.len());

        let workflow = match self.mode {
            DetectorMode::Prominent { require_labels, .. } => {
                self.track_prominent(frame, &detections, require_labels)
            }
            DetectorMode::Multi { .. } => {
                self.selection.observe(&detections);
                if detections.is_empty() {
                    WorkflowState::Detecting
                } else {
                    WorkflowState::Detected
                }
            }
        };

        self.report(frame, detections, workflow, events)
    }

    /// Select a live object in multi mode, classifying it if enabled.
    ///
    /// Returns false when the mode has no selection or the ID is not live.
    pub fn select(&mut self, tracking_id: TrackingId, frame: &Frame) -> bool {
        let DetectorMode::Multi { classification } = self.mode else {
            warn!("Selection is only available in multi mode");
            return false;
        };

        if !self.selection.is_live(tracking_id) {
            warn!("Object {} is not in view, selection ignored", tracking_id);
            return false;
        }

        let Some(crop) = self.selection.select(tracking_id, frame) else {
            warn!("Object {} has no visible area, selection ignored", tracking_id);
            return false;
        };

        if classification {
            self.request_category(tracking_id, crop);
        }
        true
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Copy of the category cache, empty without a worker
    pub fn categories(&self) -> HashMap<TrackingId, CategoryResult> {
        self.worker
            .as_ref()
            .map(|worker| worker.cache().snapshot())
            .unwrap_or_default()
    }

    /// Wait up to `timeout` for in-flight classifications to finish
    pub fn flush(&self, timeout: Duration) -> Vec<ClassificationEvent> {
        let Some(worker) = self.worker.as_ref() else {
            return Vec::new();
        };

        let deadline = Instant::now() + timeout;
        let mut events = worker.drain_events();
        while worker.in_flight() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Gave up waiting for classifications after {:?}", timeout);
                break;
            }
            if let Some(event) = worker.recv_event_timeout(remaining.min(FLUSH_POLL)) {
                events.push(event);
            }
        }

        // Events queued after the last receive
        events.extend(worker.drain_events());
        events
    }

    fn track_prominent(&mut self, frame: &Frame, detections: &[Detection], require_labels: bool) -> WorkflowState {
        let prominent = detections
            .first()
            .filter(|d| !require_labels || d.has_valid_labels());

        let Some(prominent) = prominent else {
            self.confirmation.reset();
            return WorkflowState::Detecting;
        };

        let (width, height) = frame.dimensions();
        let observation = Observation {
            tracking_id: prominent.tracking_id,
            overlaps_reticle: self.reticle.overlaps(&prominent.bounding_box, width, height),
        };

        match self.confirmation.update_at(observation, frame.timestamp) {
            Some(ConfirmationEvent::Confirmed(tracking_id)) => {
                if self.mode.classification_enabled() {
                    match frame.crop(&prominent.bounding_box) {
                        Some(crop) => self.request_category(tracking_id, crop),
                        None => warn!("Object {} has no visible area, not classifying", tracking_id),
                    }
                }
            }
            Some(event) => debug!("Confirmation event: {:?}", event),
            None => {}
        }

        match self.confirmation.state() {
            ConfirmationState::Idle => WorkflowState::Detected,
            ConfirmationState::Confirming { .. } => WorkflowState::Confirming,
            ConfirmationState::Confirmed { .. } => WorkflowState::Confirmed,
        }
    }

    fn request_category(&self, tracking_id: TrackingId, crop: image::RgbImage) {
        let Some(worker) = self.worker.as_ref() else {
            return;
        };

        match worker.get_category(tracking_id, crop) {
            None => debug!("Requested category for object {}", tracking_id),
            Some(CategoryResult::Pending) => debug!("Object {} already being classified", tracking_id),
            Some(CategoryResult::Ready(label)) => debug!("Object {} already classified as '{}'", tracking_id, label),
        }
    }

    /// Tracking ID whose label may be shown
    fn active_id(&self) -> Option<TrackingId> {
        match self.mode {
            DetectorMode::Prominent { .. } => match self.confirmation.state() {
                ConfirmationState::Confirmed { tracking_id } => Some(tracking_id),
                _ => None,
            },
            DetectorMode::Multi { .. } => self.selection.state().tracking_id(),
        }
    }

    fn merge_events(&self) -> Vec<ClassificationEvent> {
        let Some(worker) = self.worker.as_ref() else {
            return Vec::new();
        };

        let events = worker.drain_events();
        let active = self.active_id();
        for event in &events {
            if Some(event.tracking_id()) != active {
                debug!("Stale classification result for object {}", event.tracking_id());
            }
        }
        events
    }

    fn report(
        &self,
        frame: &Frame,
        detections: Vec<Detection>,
        workflow: WorkflowState,
        events: Vec<ClassificationEvent>,
    ) -> FrameReport {
        let label = self
            .active_id()
            .zip(self.worker.as_ref())
            .and_then(|(id, worker)| worker.cache().get(id))
            .and_then(|result| result.label().map(String::from));

        FrameReport {
            frame_index: frame.index,
            detections,
            confirmation: self.confirmation.state(),
            workflow,
            label,
            selection: match self.mode {
                DetectorMode::Multi { .. } => Some(self.selection.state()),
                DetectorMode::Prominent { .. } => None,
            },
            events,
        }
    }
}
