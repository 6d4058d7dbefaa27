//! Application Coordinator
//!
//! Loads the classifier, builds the frame processor and drives it over a
//! frame source, collecting a summary of what was confirmed and classified.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::capture::Frame;
use crate::classification::{
    ClassificationEvent, Classifier, ImageSearcher, OnnxImageEncoder, OnnxTextEncoder,
};
use crate::config::{AppConfig, ClassificationSettings};
use crate::confirmation::ConfirmationState;
use crate::detection::{ObjectDetector, TrackingId};
use crate::processor::{FrameProcessor, FrameReport, WorkflowState};

/// Select an object at a given frame (multi mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPlan {
    pub tracking_id: TrackingId,
    pub at_frame: u64,
    /// Frame at which the selection is dropped again
    pub clear_at: Option<u64>,
}

/// Outcome of a run, printed as JSON by the CLI
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    /// Objects that reached `Confirmed`, in order
    pub confirmed: Vec<TrackingId>,
    /// Finished classifications by tracking ID
    pub labels: BTreeMap<TrackingId, String>,
    /// Classification calls that failed or timed out
    pub failures: u64,
}

impl RunSummary {
    fn record_events(&mut self, events: &[ClassificationEvent]) {
        for event in events {
            match event {
                ClassificationEvent::Completed { tracking_id, label } => {
                    self.labels.insert(*tracking_id, label.clone());
                }
                ClassificationEvent::Failed { .. } => self.failures += 1,
            }
        }
    }
}

/// Build the embedding-search classifier from local model files
pub fn load_classifier(settings: &ClassificationSettings, models_dir: &Path) -> Result<Arc<dyn Classifier>> {
    let vision_model = settings.resolve(&settings.vision_model, models_dir);
    let text_model = settings.resolve(&settings.text_model, models_dir);
    let vocab = settings.resolve(&settings.vocab, models_dir);

    let image_encoder = OnnxImageEncoder::new(&vision_model, settings.image_size, settings.embedding_dim)
        .context("Failed to load image encoder")?;
    let text_encoder = OnnxTextEncoder::new(&text_model, &vocab, settings.embedding_dim)
        .context("Failed to load text encoder")?;

    let searcher = ImageSearcher::new(Box::new(image_encoder), &text_encoder, &settings.categories)?;
    info!(
        "Classifier ready with {} categories: {}",
        settings.categories.len(),
        searcher.categories().collect::<Vec<_>>().join(", ")
    );
    Ok(Arc::new(searcher))
}

/// Main application coordinator
pub struct ShowcaseApp {
    processor: FrameProcessor,
    /// How long to wait for in-flight classifications at the end of a run
    flush_timeout: Duration,
}

impl ShowcaseApp {
    /// Create the app, loading models when classification is enabled.
    ///
    /// Missing models are not fatal; the app runs without classification.
    pub fn new(config: &AppConfig, models_dir: &Path) -> Result<Self> {
        let classifier = if config.detector.mode().classification_enabled() {
            match load_classifier(&config.classification, models_dir) {
                Ok(classifier) => Some(classifier),
                Err(e) => {
                    warn!("Classification unavailable: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        Self::with_classifier(config, classifier)
    }

    /// Create the app around an already built classifier
    pub fn with_classifier(config: &AppConfig, classifier: Option<Arc<dyn Classifier>>) -> Result<Self> {
        let processor = FrameProcessor::from_config(config, classifier)?;
        let flush_timeout = Duration::from_millis(config.classification.timeout_ms.saturating_mul(2));

        Ok(Self {
            processor,
            flush_timeout,
        })
    }

    /// Process every frame, then wait for outstanding classifications
    pub fn run<I, D>(&mut self, frames: I, detector: &mut D, selection: Option<SelectionPlan>) -> RunSummary
    where
        I: IntoIterator<Item = Frame>,
        D: ObjectDetector + ?Sized,
    {
        info!(
            "Starting {} mode run with detector '{}'",
            self.processor.mode().name(),
            detector.name()
        );

        let mut summary = RunSummary::default();
        let mut last_workflow = None;
        let mut last_label: Option<String> = None;

        for frame in frames {
            let report = self.processor.process(detector, &frame);
            summary.frames += 1;
            summary.record_events(&report.events);

            if last_workflow != Some(report.workflow) {
                info!("Frame {}: {:?}", report.frame_index, report.workflow);
                if report.workflow == WorkflowState::Confirmed {
                    if let ConfirmationState::Confirmed { tracking_id } = report.confirmation {
                        summary.confirmed.push(tracking_id);
                    }
                }
                last_workflow = Some(report.workflow);
            }

            if report.label != last_label {
                if let Some(label) = &report.label {
                    info!("Frame {}: showing '{}'", report.frame_index, label);
                }
                last_label = report.label.clone();
            }

            if let Some(plan) = selection {
                if plan.at_frame == frame.index {
                    self.processor.select(plan.tracking_id, &frame);
                }
                if plan.clear_at == Some(frame.index) {
                    self.processor.clear_selection();
                }
            }

            log_report(&report);
        }

        let events = self.processor.flush(self.flush_timeout);
        summary.record_events(&events);

        // Results whose event was missed are still in the cache
        for (tracking_id, result) in self.processor.categories() {
            if let Some(label) = result.label() {
                summary.labels.entry(tracking_id).or_insert_with(|| label.to_string());
            }
        }

        info!(
            "Run finished: {} frames, {} confirmed, {} labelled",
            summary.frames,
            summary.confirmed.len(),
            summary.labels.len()
        );
        summary
    }
}

fn log_report(report: &FrameReport) {
    debug!(
        "Frame {}: {} objects, {:?}, progress {:.2}",
        report.frame_index,
        report.detections.len(),
        report.workflow,
        report.confirmation.progress()
    );
    if let Some(selection) = report.selection {
        debug!("Frame {}: {:?}", report.frame_index, selection);
    }
}
