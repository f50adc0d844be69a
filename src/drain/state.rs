use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Process lifecycle as seen by load balancers: `healthy -> draining -> closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainPhase {
    Healthy,
    Draining,
    Closed,
}

impl DrainPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            HEALTHY => Self::Healthy,
            DRAINING => Self::Draining,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for DrainPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const HEALTHY: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

/// The drain state machine. One atomic; transitions are compare-and-swap
/// and only ever move forward. Sequentially consistent so it orders with
/// the hub's active count.
#[derive(Debug)]
pub struct DrainState {
    phase: AtomicU8,
}

impl DrainState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(HEALTHY),
        }
    }

    pub fn phase(&self) -> DrainPhase {
        DrainPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_healthy(&self) -> bool {
        self.phase() == DrainPhase::Healthy
    }

    /// Draining or closed; either way the process is out of rotation
    pub fn is_draining(&self) -> bool {
        self.phase() != DrainPhase::Healthy
    }

    /// `Healthy -> Draining`. Returns false if a drain already started.
    pub fn begin_draining(&self) -> bool {
        self.transition(HEALTHY, DRAINING)
    }

    /// `Draining -> Closed`. Returns false from any other phase.
    pub fn close(&self) -> bool {
        self.transition(DRAINING, CLOSED)
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.phase
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for DrainState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let state = DrainState::new();
        assert!(state.is_healthy());
        assert!(!state.is_draining());

        assert!(state.begin_draining());
        assert_eq!(state.phase(), DrainPhase::Draining);
        assert!(!state.is_healthy());
        assert!(state.is_draining());

        assert!(state.close());
        assert_eq!(state.phase(), DrainPhase::Closed);
        assert!(state.is_draining());
    }

    #[test]
    fn test_no_backward_or_skipped_transitions() {
        let state = DrainState::new();
        assert!(!state.close(), "cannot close without draining first");
        assert_eq!(state.phase(), DrainPhase::Healthy);

        state.begin_draining();
        assert!(!state.begin_draining());

        state.close();
        assert!(!state.begin_draining());
        assert!(!state.close());
        assert_eq!(state.phase(), DrainPhase::Closed);
    }

    #[test]
    fn test_concurrent_begin_has_single_winner() {
        let state = std::sync::Arc::new(DrainState::new());
        let winners: usize = (0..16)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || state.begin_draining())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_phase_strings() {
        assert_eq!(DrainPhase::Healthy.as_str(), "healthy");
        assert_eq!(DrainPhase::Draining.to_string(), "draining");
        assert_eq!(
            serde_json::to_string(&DrainPhase::Closed).unwrap(),
            "\"closed\""
        );
    }
}
