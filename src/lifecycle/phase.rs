//! Server lifecycle phase.
//!
//! ```text
//! NotRunning ──listen──▶ Running ──shutdown──▶ Draining ──drained──▶ Stopped
//!      │                    │                                          ▲
//!      └────────────────────┴───────────────close──────────────────────┘
//! ```
//!
//! Transitions only move forward; `Stopped` is terminal.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    NotRunning = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::NotRunning,
            1 => Phase::Running,
            2 => Phase::Draining,
            _ => Phase::Stopped,
        }
    }
}

#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(Phase::NotRunning as u8))
    }

    pub fn load(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. On failure returns the phase actually found.
    pub fn transition(&self, from: Phase, to: Phase) -> Result<(), Phase> {
        debug_assert!(from < to, "phases only move forward");
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(Phase::from_u8)
    }

    /// Enter `Stopped`. Returns the previous phase; callers that see
    /// `Stopped` returned did not perform the transition.
    pub fn stop(&self) -> Phase {
        Phase::from_u8(self.0.swap(Phase::Stopped as u8, Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions() {
        let cell = PhaseCell::new();
        assert_eq!(cell.load(), Phase::NotRunning);

        cell.transition(Phase::NotRunning, Phase::Running).unwrap();
        assert_eq!(
            cell.transition(Phase::NotRunning, Phase::Running),
            Err(Phase::Running)
        );

        cell.transition(Phase::Running, Phase::Draining).unwrap();
        assert_eq!(cell.stop(), Phase::Draining);
        assert_eq!(cell.stop(), Phase::Stopped);
        assert_eq!(cell.load(), Phase::Stopped);
    }

    #[test]
    fn stop_from_idle() {
        let cell = PhaseCell::new();
        assert_eq!(cell.stop(), Phase::NotRunning);
        assert_eq!(
            cell.transition(Phase::NotRunning, Phase::Running),
            Err(Phase::Stopped)
        );
    }
}
