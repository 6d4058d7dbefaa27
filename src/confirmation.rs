//! Object confirmation state machine
//!
//! Tracks how long the prominent object has stayed on the reticle. Progress
//! accumulates while the same tracking ID keeps overlapping the reticle and is
//! discarded as soon as it moves off or the ID changes. Entering `Confirmed`
//! is reported exactly once per confirmation.

use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::detection::TrackingId;

/// How long an object must stay on the reticle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDuration {
    /// Consecutive frames
    Frames(u32),
    /// Wall-clock time since the object first hit the reticle
    Time(Duration),
}

/// Current confirmation state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ConfirmationState {
    #[default]
    Idle,
    Confirming {
        tracking_id: TrackingId,
        /// Fraction of the confirmation duration elapsed (0.0 - 1.0)
        progress: f32,
    },
    Confirmed {
        tracking_id: TrackingId,
    },
}

impl ConfirmationState {
    /// Tracking ID the state refers to, if any
    pub fn tracking_id(&self) -> Option<TrackingId> {
        match *self {
            ConfirmationState::Idle => None,
            ConfirmationState::Confirming { tracking_id, .. } => Some(tracking_id),
            ConfirmationState::Confirmed { tracking_id } => Some(tracking_id),
        }
    }

    pub fn progress(&self) -> f32 {
        match *self {
            ConfirmationState::Idle => 0.0,
            ConfirmationState::Confirming { progress, .. } => progress,
            ConfirmationState::Confirmed { .. } => 1.0,
        }
    }
}

/// Per-frame input to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Identity of the prominent detection, `None` when nothing is tracked
    pub tracking_id: Option<TrackingId>,
    /// Whether its box overlaps the reticle this frame
    pub overlaps_reticle: bool,
}

impl Observation {
    pub fn on_reticle(tracking_id: TrackingId) -> Self {
        Self {
            tracking_id: Some(tracking_id),
            overlaps_reticle: true,
        }
    }

    pub fn off_reticle(tracking_id: Option<TrackingId>) -> Self {
        Self {
            tracking_id,
            overlaps_reticle: false,
        }
    }
}

/// Transition worth reacting to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationEvent {
    /// Started confirming a new object
    Started(TrackingId),
    /// Progress discarded for the object
    Reset(TrackingId),
    /// Object has just been confirmed
    Confirmed(TrackingId),
}

/// Drives `ConfirmationState` from per-frame observations
#[derive(Debug)]
pub struct ConfirmationController {
    duration: ConfirmationDuration,
    state: ConfirmationState,
    frames_on_reticle: u32,
    started_at: Instant,
}

impl ConfirmationController {
    pub fn new(duration: ConfirmationDuration) -> Self {
        Self {
            duration,
            state: ConfirmationState::Idle,
            frames_on_reticle: 0,
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> ConfirmationState {
        self.state
    }

    /// Feed one frame's observation with an explicit clock reading
    pub fn update_at(&mut self, observation: Observation, now: Instant) -> Option<ConfirmationEvent> {
        let Some(tracking_id) = observation.tracking_id.filter(|_| observation.overlaps_reticle) else {
            return self.reset();
        };

        match self.state {
            ConfirmationState::Idle => {
                self.frames_on_reticle = 0;
                self.started_at = now;
                debug!("Started confirming object {}", tracking_id);
                Some(self.advance(tracking_id, now).unwrap_or(ConfirmationEvent::Started(tracking_id)))
            }
            ConfirmationState::Confirming { tracking_id: current, .. } if current == tracking_id => {
                self.advance(tracking_id, now)
            }
            ConfirmationState::Confirmed { tracking_id: current } if current == tracking_id => None,
            // Another object took the reticle
            _ => self.reset(),
        }
    }

    /// Drop any progress and return to `Idle`
    pub fn reset(&mut self) -> Option<ConfirmationEvent> {
        self.frames_on_reticle = 0;
        let previous = std::mem::take(&mut self.state);
        previous.tracking_id().map(|tracking_id| {
            debug!("Confirmation reset for object {}", tracking_id);
            ConfirmationEvent::Reset(tracking_id)
        })
    }

    fn advance(&mut self, tracking_id: TrackingId, now: Instant) -> Option<ConfirmationEvent> {
        self.frames_on_reticle = self.frames_on_reticle.saturating_add(1);

        let (progress, done) = match self.duration {
            ConfirmationDuration::Frames(total) => {
                let total = total.max(1);
                let progress = (self.frames_on_reticle as f32 / total as f32).min(1.0);
                (progress, self.frames_on_reticle >= total)
            }
            ConfirmationDuration::Time(total) => {
                let elapsed = now.saturating_duration_since(self.started_at);
                let progress = if total.is_zero() {
                    1.0
                } else {
                    (elapsed.as_secs_f32() / total.as_secs_f32()).min(1.0)
                };
                (progress, elapsed >= total)
            }
        };

        if done {
            info!("Object {} confirmed", tracking_id);
            self.state = ConfirmationState::Confirmed { tracking_id };
            Some(ConfirmationEvent::Confirmed(tracking_id))
        } else {
            self.state = ConfirmationState::Confirming { tracking_id, progress };
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl ConfirmationController {
        fn update(&mut self, observation: Observation) -> Option<ConfirmationEvent> {
            self.update_at(observation, Instant::now())
        }

        fn progress(&self) -> f32 {
            self.state.progress()
        }
    }

    #[test]
    fn test_confirms_after_duration_frames() {
        let mut controller = ConfirmationController::new(ConfirmationDuration::Frames(5));
        let mut confirmations = 0;

        for frame in 0..5 {
            let event = controller.update(Observation::on_reticle(7));
            if frame == 0 {
                assert_eq!(event, Some(ConfirmationEvent::Started(7)));
            }
            if event == Some(ConfirmationEvent::Confirmed(7)) {
                confirmations += 1;
            }
        }

        assert_eq!(confirmations, 1);
        assert_eq!(controller.state(), ConfirmationState::Confirmed { tracking_id: 7 });

        // Staying confirmed is a no-op
        for _ in 0..100 {
            assert_eq!(controller.update(Observation::on_reticle(7)), None);
        }
        assert!(matches!(controller.state(), ConfirmationState::Confirmed { .. }));
    }

    #[test]
    fn test_progress_increments_per_frame() {
        let mut controller = ConfirmationController::new(ConfirmationDuration::Frames(4));

        controller.update(Observation::on_reticle(1));
        assert!((controller.progress() - 0.25).abs() < 1e-6);
        controller.update(Observation::on_reticle(1));
        assert!((controller.progress() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_tracking_id_change_resets() {
        let n = 10;
        let mut controller = ConfirmationController::new(ConfirmationDuration::Frames(n));

        for _ in 0..n - 1 {
            assert_ne!(controller.update(Observation::on_reticle(7)), Some(ConfirmationEvent::Confirmed(7)));
        }
        assert_eq!(controller.update(Observation::on_reticle(9)), Some(ConfirmationEvent::Reset(7)));
        assert_eq!(controller.state(), ConfirmationState::Idle);
        assert_eq!(controller.progress(), 0.0);
    }

    #[test]
    fn test_moving_off_reticle_resets() {
        let mut controller = ConfirmationController::new(ConfirmationDuration::Frames(3));

        controller.update(Observation::on_reticle(2));
        controller.update(Observation::on_reticle(2));
        assert_eq!(controller.update(Observation::off_reticle(Some(2))), Some(ConfirmationEvent::Reset(2)));

        // Progress starts over
        controller.update(Observation::on_reticle(2));
        assert!((controller.progress() - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_confirmed_resets_on_lost_tracking() {
        let mut controller = ConfirmationController::new(ConfirmationDuration::Frames(1));

        assert_eq!(controller.update(Observation::on_reticle(3)), Some(ConfirmationEvent::Confirmed(3)));
        assert_eq!(
            controller.update(Observation { tracking_id: None, overlaps_reticle: true }),
            Some(ConfirmationEvent::Reset(3))
        );
        assert_eq!(controller.state(), ConfirmationState::Idle);
    }

    #[test]
    fn test_confirmed_resets_on_other_object() {
        let mut controller = ConfirmationController::new(ConfirmationDuration::Frames(1));

        controller.update(Observation::on_reticle(3));
        assert_eq!(controller.update(Observation::on_reticle(4)), Some(ConfirmationEvent::Reset(3)));
    }

    #[test]
    fn test_idle_reset_is_silent() {
        let mut controller = ConfirmationController::new(ConfirmationDuration::Frames(3));
        assert_eq!(controller.update(Observation::off_reticle(None)), None);
        assert_eq!(controller.reset(), None);
    }

    #[test]
    fn test_time_based_confirmation() {
        let mut controller =
            ConfirmationController::new(ConfirmationDuration::Time(Duration::from_millis(1000)));
        let start = Instant::now();

        controller.update_at(Observation::on_reticle(5), start);
        assert_eq!(controller.progress(), 0.0);

        controller.update_at(Observation::on_reticle(5), start + Duration::from_millis(500));
        assert!((controller.progress() - 0.5).abs() < 1e-3);

        let event = controller.update_at(Observation::on_reticle(5), start + Duration::from_millis(1000));
        assert_eq!(event, Some(ConfirmationEvent::Confirmed(5)));
    }
}
