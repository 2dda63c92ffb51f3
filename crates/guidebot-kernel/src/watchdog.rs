//! [`StuckStateDetector`] – notices a state that has stopped changing.
//!
//! A supervisor loop feeds the current state into
//! [`StuckStateDetector::observe`] at a fixed cadence.  The detector tracks
//! how long the state has been unchanged; once that exceeds the threshold
//! *and* the state is one of the watched kinds, it returns
//! [`Verdict::Stuck`] and restarts its timer so a single stall produces a
//! single reset.
//!
//! The detector is pure: it never reads the clock itself, so it can be
//! driven deterministically in tests.

use std::time::{Duration, Instant};

use guidebot_types::{ApplicationState, StateKind};

/// Default stall threshold.
pub const DEFAULT_STUCK_THRESHOLD: Duration = Duration::from_secs(30);

/// Result of one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    /// The state has been unchanged for `stalled_for`.
    Stuck { kind: StateKind, stalled_for: Duration },
}

/// Stall detector over [`ApplicationState`] observations.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use guidebot_kernel::watchdog::{StuckStateDetector, Verdict};
/// use guidebot_types::ApplicationState;
///
/// let t0 = Instant::now();
/// let mut detector = StuckStateDetector::new(Duration::from_secs(30));
/// assert_eq!(detector.observe(&ApplicationState::Reasoning, t0), Verdict::Healthy);
/// let later = t0 + Duration::from_secs(31);
/// assert!(matches!(
///     detector.observe(&ApplicationState::Reasoning, later),
///     Verdict::Stuck { .. }
/// ));
/// ```
pub struct StuckStateDetector {
    threshold: Duration,
    watched: Vec<StateKind>,
    last: Option<(ApplicationState, Instant)>,
}

impl StuckStateDetector {
    /// Watch [`StateKind::Reasoning`] with the given threshold.
    pub fn new(threshold: Duration) -> Self {
        Self::watching(threshold, vec![StateKind::Reasoning])
    }

    /// Watch an explicit set of state kinds.
    pub fn watching(threshold: Duration, watched: Vec<StateKind>) -> Self {
        Self {
            threshold,
            watched,
            last: None,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn observe(&mut self, state: &ApplicationState, now: Instant) -> Verdict {
        let since = match &self.last {
            Some((last, since)) if last == state => *since,
            _ => {
                self.last = Some((state.clone(), now));
                return Verdict::Healthy;
            }
        };

        let stalled_for = now.saturating_duration_since(since);
        if stalled_for < self.threshold || !self.watched.contains(&state.kind()) {
            return Verdict::Healthy;
        }

        self.last = Some((state.clone(), now));
        Verdict::Stuck {
            kind: state.kind(),
            stalled_for,
        }
    }

    /// Forget the last observation.
    pub fn clear(&mut self) {
        self.last = None;
    }
}

impl Default for StuckStateDetector {
    fn default() -> Self {
        Self::new(DEFAULT_STUCK_THRESHOLD)
    }
}
