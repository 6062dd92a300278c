use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::history::DEFAULT_HISTORY_CAPACITY;

const AUTOSAVE_DELAY_DEFAULT: Duration = Duration::from_secs(2);
const SAVED_DISPLAY_DEFAULT: Duration = Duration::from_secs(2);
const ERROR_DISPLAY_DEFAULT: Duration = Duration::from_secs(3);

/// Engine tunables. `from_env` lets the binary override them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub history_capacity: usize,
    pub autosave_delay: Duration,
    /// How long `saved` stays visible before reverting to `idle`.
    pub saved_display: Duration,
    pub error_display: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            autosave_delay: AUTOSAVE_DELAY_DEFAULT,
            saved_display: SAVED_DISPLAY_DEFAULT,
            error_display: ERROR_DISPLAY_DEFAULT,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            history_capacity: std::env::var("KMAP_HISTORY_CAPACITY")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(defaults.history_capacity),
            autosave_delay: std::env::var("KMAP_AUTOSAVE_MS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.autosave_delay),
            ..defaults
        }
    }
}

/// Source of time for everything debounced, so tests can drive it by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let elapsed = self
            .elapsed
            .lock()
            .map(|elapsed| *elapsed)
            .unwrap_or_default();
        self.start + elapsed
    }
}

/// Debounced autosave timer. Each `schedule` pushes the deadline out again, so a
/// burst of edits produces a single save once things go quiet.
#[derive(Debug, Clone)]
pub struct AutosaveScheduler {
    delay: Duration,
    deadline: Option<Instant>,
}

impl AutosaveScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fires at most once per schedule: returns true and disarms when the deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Reverts a transient save status (`saved`, `error`) back to `idle`.
#[derive(Debug, Clone, Default)]
pub struct StatusTimer {
    revert_at: Option<Instant>,
}

impl StatusTimer {
    pub fn arm(&mut self, now: Instant, display: Duration) {
        self.revert_at = Some(now + display);
    }

    pub fn disarm(&mut self) {
        self.revert_at = None;
    }

    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.revert_at {
            Some(at) if at <= now => {
                self.revert_at = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescheduling_pushes_the_deadline_out() {
        let clock = ManualClock::new();
        let mut autosave = AutosaveScheduler::new(Duration::from_secs(2));

        autosave.schedule(clock.now());
        clock.advance(Duration::from_millis(1500));
        autosave.schedule(clock.now());
        clock.advance(Duration::from_millis(1500));
        assert!(!autosave.take_due(clock.now()));

        clock.advance(Duration::from_millis(500));
        assert!(autosave.take_due(clock.now()));
        assert!(!autosave.take_due(clock.now()));
        assert!(!autosave.is_pending());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let clock = ManualClock::new();
        let mut autosave = AutosaveScheduler::new(Duration::from_secs(2));
        autosave.schedule(clock.now());
        autosave.cancel();
        clock.advance(Duration::from_secs(10));
        assert!(!autosave.take_due(clock.now()));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let before = other.now();
        clock.advance(Duration::from_secs(1));
        assert_eq!(other.now() - before, Duration::from_secs(1));
    }

    #[test]
    fn status_timer_reverts_after_display_window() {
        let clock = ManualClock::new();
        let mut timer = StatusTimer::default();
        timer.arm(clock.now(), Duration::from_secs(2));
        clock.advance(Duration::from_secs(1));
        assert!(!timer.take_due(clock.now()));
        clock.advance(Duration::from_secs(1));
        assert!(timer.take_due(clock.now()));
    }
}
