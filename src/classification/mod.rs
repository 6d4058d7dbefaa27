//! Classification Layer
//!
//! Zero-shot categorisation of confirmed objects by embedding search, plus the
//! per-tracking-ID result cache and the background worker that fills it.
//! Inference runs off the frame thread; results come back over a channel and
//! are merged on the next frame.

pub mod cache;
pub mod encoders;
pub mod searcher;
pub mod worker;

use image::RgbImage;
use std::time::Duration;
use thiserror::Error;

pub use cache::{CategoryCache, CategoryResult, Reservation};
pub use encoders::{OnnxImageEncoder, OnnxSession, OnnxTextEncoder};
pub use searcher::{cosine_similarity, ImageEncoder, ImageSearcher, TextEncoder};
pub use worker::{ClassificationEvent, ClassificationWorker, WorkerConfig};

/// Failure of a single classification call. Always recoverable.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifyError {
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("category catalog is empty")]
    EmptyCatalog,
    #[error("embedding dimension mismatch: image {image}, catalog {catalog}")]
    DimensionMismatch { image: usize, catalog: usize },
    #[error("classification timed out after {0:?}")]
    Timeout(Duration),
    #[error("classification worker stopped")]
    WorkerStopped,
}

/// Anything that can turn an object crop into a category label
pub trait Classifier: Send + Sync + 'static {
    fn classify(&self, crop: &RgbImage) -> Result<String, ClassifyError>;
}
