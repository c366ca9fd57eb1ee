//! One-shot session lifecycle: unopened, opened, closed.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use dbview_core::{LivePhase, NotLiveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unopened,
    Opened,
    Closed,
}

impl Phase {
    fn as_u8(self) -> u8 {
        match self {
            Phase::Unopened => 0,
            Phase::Opened => 1,
            Phase::Closed => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Phase::Unopened,
            1 => Phase::Opened,
            _ => Phase::Closed,
        }
    }

    /// Fail unless this phase allows access.
    pub fn ensure_open(self, subject: &str) -> Result<(), NotLiveError> {
        match self {
            Phase::Opened => Ok(()),
            Phase::Unopened => Err(NotLiveError::new(subject, LivePhase::TooEarly)),
            Phase::Closed => Err(NotLiveError::new(subject, LivePhase::TooLate)),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Unopened => "unopened",
            Phase::Opened => "opened",
            Phase::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Atomically readable phase cell.
///
/// Transitions happen under the view's guard; reads are lock-free.
#[derive(Debug)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(Phase::Unopened.as_u8()))
    }

    pub(crate) fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, phase: Phase) {
        self.0.store(phase.as_u8(), Ordering::Release);
    }
}
