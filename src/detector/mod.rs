mod engine;
mod heuristics;
mod observers;

pub use engine::Detector;
pub use heuristics::{Debounce, PhaseInferenceEngine};
pub use observers::{CallbackId, ObserverRegistry, StateChangeCallback};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of the monitored application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum Phase {
    /// Nothing inferred yet
    #[default]
    Unknown = 0,
    /// The application is not running
    NotRunning = 1,
    /// At menu or selection screens
    Menu = 2,
    /// Services or the scene are still loading
    Loading = 3,
    /// Fully joined to an interactive session
    InSession = 4,
    /// Just left a session
    Leaving = 5,
}

impl Phase {
    pub fn is_in_session(self) -> bool {
        self == Phase::InSession
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::NotRunning,
            2 => Phase::Menu,
            3 => Phase::Loading,
            4 => Phase::InSession,
            5 => Phase::Leaving,
            _ => Phase::Unknown,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Unknown => "unknown",
            Phase::NotRunning => "not running",
            Phase::Menu => "menu",
            Phase::Loading => "loading",
            Phase::InSession => "in session",
            Phase::Leaving => "leaving",
        };
        f.write_str(name)
    }
}
