//! Application Configuration
//!
//! User settings stored in TOML format. Raw values are checked once at
//! startup and turned into runtime types; nothing is validated per frame.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::classification::WorkerConfig;
use crate::confirmation::ConfirmationDuration;
use crate::detection::dedupe::{DEFAULT_IOU_THRESHOLD, DEFAULT_OVERLAP_FACTOR};
use crate::detection::OverlapPolicy;
use crate::processor::DetectorMode;

/// Invalid configuration, reported before any frame is processed
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("IoU threshold must be within [0, 1], got {0}")]
    InvalidIouThreshold(f32),
    #[error("overlap factor must be within [0, 1], got {0}")]
    InvalidOverlapFactor(f32),
    #[error("confirmation duration must be greater than zero")]
    ZeroConfirmationDuration,
    #[error("reticle radius must be positive, got {0}")]
    InvalidReticleRadius(f32),
    #[error("classification needs at least one worker thread")]
    ZeroWorkers,
    #[error("classification timeout must be greater than zero")]
    ZeroTimeout,
    #[error("classification cache capacity must be greater than zero")]
    ZeroCacheCapacity,
    #[error("category catalog is empty")]
    EmptyCatalog,
}

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Detector mode settings
    pub detector: DetectorSettings,
    /// Duplicate box filtering
    pub dedupe: DedupeSettings,
    /// Confirmation timing
    pub confirmation: ConfirmationSettings,
    /// Confirmation reticle geometry
    pub reticle: ReticleSettings,
    /// Embedding search and worker settings
    pub classification: ClassificationSettings,
}

impl AppConfig {
    /// Check every section, failing on the first invalid value
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dedupe.policy()?;
        self.confirmation.duration()?;
        self.reticle.radius()?;
        if self.detector.mode().classification_enabled() {
            self.classification.worker_config()?;
            if self.classification.categories.is_empty() {
                return Err(ConfigError::EmptyCatalog);
            }
        }
        Ok(())
    }
}

/// Which processing mode to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    /// Single prominent object with reticle confirmation
    #[default]
    Prominent,
    /// All objects, with tap selection
    Multi,
}

/// Detector mode settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Processing mode
    pub mode: ModeKind,
    /// Run embedding classification on confirmed/selected objects
    pub classification: bool,
    /// Prominent mode only: ignore objects without detector labels
    pub require_labels: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            mode: ModeKind::Prominent,
            classification: true,
            require_labels: false,
        }
    }
}

impl DetectorSettings {
    /// Resolve into the runtime mode
    pub fn mode(&self) -> DetectorMode {
        match self.mode {
            ModeKind::Prominent => DetectorMode::Prominent {
                classification: self.classification,
                require_labels: self.require_labels,
            },
            ModeKind::Multi => DetectorMode::Multi {
                classification: self.classification,
            },
        }
    }
}

/// Overlap metric selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Iou,
    Fraction,
}

/// Duplicate box filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeSettings {
    /// Overlap metric
    pub policy: PolicyKind,
    /// Threshold for the IoU metric (0.0 - 1.0)
    pub iou_threshold: f32,
    /// Factor for the fractional metric (0.0 - 1.0)
    pub overlap_factor: f32,
}

impl Default for DedupeSettings {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Iou,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            overlap_factor: DEFAULT_OVERLAP_FACTOR,
        }
    }
}

impl DedupeSettings {
    pub fn policy(&self) -> Result<OverlapPolicy, ConfigError> {
        match self.policy {
            PolicyKind::Iou => OverlapPolicy::iou(self.iou_threshold),
            PolicyKind::Fraction => OverlapPolicy::fraction(self.overlap_factor),
        }
    }
}

/// Confirmation timing. `duration_ms` takes precedence when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationSettings {
    /// Consecutive frames on the reticle needed to confirm
    pub duration_frames: u32,
    /// Time on the reticle needed to confirm
    pub duration_ms: Option<u64>,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            duration_frames: 30,
            duration_ms: None,
        }
    }
}

impl ConfirmationSettings {
    pub fn duration(&self) -> Result<ConfirmationDuration, ConfigError> {
        match self.duration_ms {
            Some(0) => Err(ConfigError::ZeroConfirmationDuration),
            Some(ms) => Ok(ConfirmationDuration::Time(Duration::from_millis(ms))),
            None if self.duration_frames == 0 => Err(ConfigError::ZeroConfirmationDuration),
            None => Ok(ConfirmationDuration::Frames(self.duration_frames)),
        }
    }
}

/// Confirmation reticle geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReticleSettings {
    /// Half-side of the square reticle, in frame pixels
    pub outer_radius: f32,
}

impl Default for ReticleSettings {
    fn default() -> Self {
        Self { outer_radius: 60.0 }
    }
}

impl ReticleSettings {
    pub fn radius(&self) -> Result<f32, ConfigError> {
        if !(self.outer_radius > 0.0) {
            return Err(ConfigError::InvalidReticleRadius(self.outer_radius));
        }
        Ok(self.outer_radius)
    }
}

/// Embedding search and worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationSettings {
    /// Upper bound for one classification call
    pub timeout_ms: u64,
    /// Blocking inference threads
    pub worker_threads: usize,
    /// Evict oldest finished entries past this size (unbounded when unset)
    pub max_cache_entries: Option<usize>,
    /// Image encoder model, relative to the models directory unless absolute
    pub vision_model: PathBuf,
    /// Text encoder model
    pub text_model: PathBuf,
    /// Word vocabulary for the text encoder
    pub vocab: PathBuf,
    /// Square input size of the image encoder
    pub image_size: u32,
    /// Length of one embedding vector
    pub embedding_dim: usize,
    /// Category strings searched against
    pub categories: Vec<String>,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            worker_threads: 2,
            max_cache_entries: None,
            vision_model: PathBuf::from("vision_model.onnx"),
            text_model: PathBuf::from("text_model.onnx"),
            vocab: PathBuf::from("vocab.json"),
            image_size: 256,
            embedding_dim: 512,
            categories: default_categories(),
        }
    }
}

impl ClassificationSettings {
    pub fn worker_config(&self) -> Result<WorkerConfig, ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_cache_entries == Some(0) {
            return Err(ConfigError::ZeroCacheCapacity);
        }

        Ok(WorkerConfig {
            worker_threads: self.worker_threads,
            timeout: Duration::from_millis(self.timeout_ms),
            max_cache_entries: self.max_cache_entries,
        })
    }

    /// Resolve a model path against the models directory
    pub fn resolve(&self, path: &Path, models_dir: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            models_dir.join(path)
        }
    }
}

fn default_categories() -> Vec<String> {
    [
        "Antiques",
        "Art",
        "Baby",
        "Books",
        "Business & Industrial",
        "Cameras & Photo",
        "Cell Phones & Accessories",
        "Clothing, Shoes & Accessories",
        "Coins & Paper Money",
        "Collectibles",
        "Computers, Tablets & Networking",
        "Consumer Electronics",
        "Crafts",
        "Dolls & Bears",
        "Health & Beauty",
        "Home & Garden",
        "Jewelry & Watches",
        "Musical Instruments & Gear",
        "Pet Supplies",
        "Pottery & Glass",
        "Sporting Goods",
        "Toys & Hobbies",
        "Travel",
        "Video Games & Consoles",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
