//! Background classification worker
//!
//! Owns a tokio runtime that runs classifier calls on the blocking pool,
//! bounded by a timeout. Results are written to the shared cache and reported
//! back to the frame loop over a channel.

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{CategoryCache, CategoryResult, Reservation};
use super::{Classifier, ClassifyError};
use crate::detection::TrackingId;

/// Checked worker settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Blocking threads available for inference
    pub worker_threads: usize,
    /// Upper bound for one classification call
    pub timeout: Duration,
    /// Cache size limit, unbounded when `None`
    pub max_cache_entries: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            timeout: Duration::from_secs(5),
            max_cache_entries: None,
        }
    }
}

/// Completion notice delivered to the frame loop
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationEvent {
    Completed {
        tracking_id: TrackingId,
        label: String,
    },
    Failed {
        tracking_id: TrackingId,
        error: ClassifyError,
    },
}

impl ClassificationEvent {
    pub fn tracking_id(&self) -> TrackingId {
        match self {
            ClassificationEvent::Completed { tracking_id, .. } => *tracking_id,
            ClassificationEvent::Failed { tracking_id, .. } => *tracking_id,
        }
    }
}

/// Issues at most one classification per tracking ID
pub struct ClassificationWorker {
    runtime: Option<Runtime>,
    classifier: Arc<dyn Classifier>,
    cache: Arc<CategoryCache>,
    timeout: Duration,
    events_tx: Sender<ClassificationEvent>,
    events_rx: Receiver<ClassificationEvent>,
    /// Spawned requests whose event has not been sent yet
    in_flight: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl ClassificationWorker {
    /// Create a worker with its own runtime and cache
    pub fn new(classifier: Arc<dyn Classifier>, config: WorkerConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads.max(1))
            .thread_name("classification")
            .enable_time()
            .build()
            .context("Failed to create classification runtime")?;

        let (events_tx, events_rx) = unbounded();

        info!(
            "Classification worker ready ({} threads, timeout {:?})",
            config.worker_threads, config.timeout
        );

        Ok(Self {
            runtime: Some(runtime),
            classifier,
            cache: Arc::new(CategoryCache::with_max_entries(config.max_cache_entries)),
            timeout: config.timeout,
            events_tx,
            events_rx,
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        })
    }

    /// Shared cache handle
    pub fn cache(&self) -> Arc<CategoryCache> {
        self.cache.clone()
    }

    /// Look up the category for an object, issuing classification on first use.
    ///
    /// Returns `None` when this call issued the request, otherwise the cached
    /// value. Never blocks on inference.
    pub fn get_category(&self, tracking_id: TrackingId, crop: RgbImage) -> Option<CategoryResult> {
        match self.cache.reserve(tracking_id) {
            Reservation::Existing(result) => Some(result),
            Reservation::Reserved => {
                self.spawn(tracking_id, crop);
                None
            }
        }
    }

    /// Completion events received since the last call
    pub fn drain_events(&self) -> Vec<ClassificationEvent> {
        self.events_rx.try_iter().collect()
    }

    /// Requests still running. Drops to zero only after their events are queued.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait for the next completion event
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<ClassificationEvent> {
        self.events_rx.recv_timeout(timeout).ok()
    }

    fn spawn(&self, tracking_id: TrackingId, crop: RgbImage) {
        let Some(runtime) = self.runtime.as_ref() else {
            self.finish(tracking_id, Err(ClassifyError::WorkerStopped));
            return;
        };

        info!("Classifying object {}", tracking_id);

        let classifier = self.classifier.clone();
        let cache = self.cache.clone();
        let events_tx = self.events_tx.clone();
        let shutdown = self.shutdown.clone();
        let in_flight = self.in_flight.clone();
        let timeout = self.timeout;

        in_flight.fetch_add(1, Ordering::AcqRel);
        runtime.spawn(async move {
            let job = tokio::task::spawn_blocking(move || classifier.classify(&crop));

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => Err(ClassifyError::WorkerStopped),
                result = tokio::time::timeout(timeout, job) => match result {
                    Err(_) => Err(ClassifyError::Timeout(timeout)),
                    Ok(Err(join_error)) => Err(ClassifyError::Inference(join_error.to_string())),
                    Ok(Ok(result)) => result,
                },
            };

            complete(&cache, &events_tx, tracking_id, outcome);
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }

    fn finish(&self, tracking_id: TrackingId, outcome: Result<String, ClassifyError>) {
        complete(&self.cache, &self.events_tx, tracking_id, outcome);
    }
}

fn complete(
    cache: &CategoryCache,
    events_tx: &Sender<ClassificationEvent>,
    tracking_id: TrackingId,
    outcome: Result<String, ClassifyError>,
) {
    let event = match outcome {
        Ok(label) => {
            info!("Object {} classified as '{}'", tracking_id, label);
            cache.complete(tracking_id, label.clone());
            ClassificationEvent::Completed { tracking_id, label }
        }
        Err(error) => {
            warn!("Classification of object {} failed: {}", tracking_id, error);
            cache.release(tracking_id);
            ClassificationEvent::Failed { tracking_id, error }
        }
    };

    if events_tx.send(event).is_err() {
        debug!("Frame loop gone, dropping result for object {}", tracking_id);
    }
}

impl Drop for ClassificationWorker {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_millis(500));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    const WAIT: Duration = Duration::from_secs(5);

    struct CountingClassifier {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl Classifier for CountingClassifier {
        fn classify(&self, _crop: &RgbImage) -> Result<String, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok("Toys & Hobbies".to_string())
        }
    }

    struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn classify(&self, _crop: &RgbImage) -> Result<String, ClassifyError> {
            Err(ClassifyError::Inference("model exploded".to_string()))
        }
    }

    fn counting(delay: Duration) -> (Arc<AtomicUsize>, Arc<dyn Classifier>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let classifier = Arc::new(CountingClassifier {
            calls: calls.clone(),
            delay,
        });
        (calls, classifier)
    }

    fn crop() -> RgbImage {
        RgbImage::new(4, 4)
    }

    #[test]
    fn test_first_lookup_issues_request() {
        let (calls, classifier) = counting(Duration::ZERO);
        let worker = ClassificationWorker::new(classifier, WorkerConfig::default()).unwrap();

        assert_eq!(worker.get_category(7, crop()), None);

        let event = worker.recv_event_timeout(WAIT).unwrap();
        assert_eq!(
            event,
            ClassificationEvent::Completed {
                tracking_id: 7,
                label: "Toys & Hobbies".to_string()
            }
        );
        assert_eq!(
            worker.get_category(7, crop()),
            Some(CategoryResult::Ready("Toys & Hobbies".to_string()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pending_lookup_does_not_reissue() {
        let (calls, classifier) = counting(Duration::from_millis(200));
        let worker = ClassificationWorker::new(classifier, WorkerConfig::default()).unwrap();

        assert_eq!(worker.get_category(1, crop()), None);
        assert_eq!(worker.get_category(1, crop()), Some(CategoryResult::Pending));

        worker.recv_event_timeout(WAIT).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_lookups_classify_once() {
        let (calls, classifier) = counting(Duration::from_millis(50));
        let worker = ClassificationWorker::new(classifier, WorkerConfig::default()).unwrap();
        let barrier = Barrier::new(2);

        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    barrier.wait();
                    worker.get_category(11, crop());
                });
            }
        });

        worker.recv_event_timeout(WAIT).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(worker.recv_event_timeout(Duration::from_millis(200)).is_none());
    }

    #[test]
    fn test_failure_makes_entry_retryable() {
        let worker = ClassificationWorker::new(Arc::new(FailingClassifier), WorkerConfig::default()).unwrap();

        worker.get_category(3, crop());
        let event = worker.recv_event_timeout(WAIT).unwrap();
        assert!(matches!(event, ClassificationEvent::Failed { tracking_id: 3, .. }));
        assert!(!worker.cache().snapshot().contains_key(&3));

        // A retry issues a new request
        assert_eq!(worker.get_category(3, crop()), None);
    }

    #[test]
    fn test_timeout_releases_entry() {
        let (_, classifier) = counting(Duration::from_millis(500));
        let config = WorkerConfig {
            timeout: Duration::from_millis(20),
            ..WorkerConfig::default()
        };
        let worker = ClassificationWorker::new(classifier, config).unwrap();

        worker.get_category(5, crop());
        let event = worker.recv_event_timeout(WAIT).unwrap();
        assert_eq!(
            event,
            ClassificationEvent::Failed {
                tracking_id: 5,
                error: ClassifyError::Timeout(Duration::from_millis(20))
            }
        );
        assert!(!worker.cache().snapshot().contains_key(&5));
    }

    #[test]
    fn test_drain_events_collects_completions() {
        let (_, classifier) = counting(Duration::ZERO);
        let worker = ClassificationWorker::new(classifier, WorkerConfig::default()).unwrap();

        worker.get_category(1, crop());
        worker.get_category(2, crop());

        let deadline = std::time::Instant::now() + WAIT;
        let mut seen = Vec::new();
        while seen.len() < 2 && std::time::Instant::now() < deadline {
            seen.extend(worker.drain_events().into_iter().map(|e| e.tracking_id()));
            std::thread::sleep(Duration::from_millis(5));
        }

        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }
}
