//! Per-server probe state machine.
//!
//! # State Transitions
//! ```text
//! Online → Offline: consecutive failures >= threshold
//! Offline → Online: any successful probe
//! ```
//!
//! # Design Decisions
//! - Recording a result returns the transition, if any, so callers notify
//!   only on real changes
//! - Servers start Online, matching the registry's view of a new entry

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;

/// Probe bookkeeping for one server.
#[derive(Debug)]
pub struct ProbeState {
    online: AtomicBool,
    failures: AtomicU32,
    last_probe: Mutex<Option<Instant>>,
}

impl ProbeState {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            last_probe: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn last_probe(&self) -> Option<Instant> {
        *self.last_probe.lock()
    }

    /// Record a successful probe. Returns `Some(true)` on an Offline → Online transition.
    pub fn record_success(&self) -> Option<bool> {
        self.touch();
        self.failures.store(0, Ordering::Release);
        self.online
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| true)
    }

    /// Record a failed probe. Returns `Some(false)` on an Online → Offline transition.
    pub fn record_failure(&self, threshold: u32) -> Option<bool> {
        self.touch();
        let failures = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if failures < threshold.max(1) {
            return None;
        }
        self.online
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| false)
    }

    /// Forget the failure streak and mark Online. Returns true if it was Offline.
    pub fn reset(&self) -> bool {
        self.failures.store(0, Ordering::Release);
        !self.online.swap(true, Ordering::AcqRel)
    }

    fn touch(&self) {
        *self.last_probe.lock() = Some(Instant::now());
    }
}

impl Default for ProbeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_transition_once() {
        let state = ProbeState::new();
        assert_eq!(state.record_failure(3), None);
        assert_eq!(state.record_failure(3), None);
        assert_eq!(state.record_failure(3), Some(false));
        assert!(!state.is_online());

        // Further failures do not transition again.
        assert_eq!(state.record_failure(3), None);
        assert_eq!(state.failures(), 4);

        assert_eq!(state.record_success(), Some(true));
        assert!(state.is_online());
        assert_eq!(state.failures(), 0);
        assert_eq!(state.record_success(), None);
        assert!(state.last_probe().is_some());
    }

    #[test]
    fn test_reset_restores_online() {
        let state = ProbeState::new();
        assert!(!state.reset());
        state.record_failure(1);
        assert!(!state.is_online());
        assert!(state.reset());
        assert!(state.is_online());
        assert_eq!(state.failures(), 0);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let state = ProbeState::new();
        state.record_failure(2);
        state.record_success();
        assert_eq!(state.record_failure(2), None);
        assert!(state.is_online());
    }
}
