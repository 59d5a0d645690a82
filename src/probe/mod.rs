mod scripted;

pub use scripted::{ProbeScript, ScriptedBackend};

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;
use crate::detector::{Phase, PhaseInferenceEngine};

/// Read-only queries against the monitored application's live object graph.
///
/// Every probe must return quickly. Absence of an object is a normal `false`
/// or empty result, never a failure.
pub trait ProbeBackend: Send + Sync {
    /// Called once at the start of every inference cycle, before any other probe.
    fn begin_cycle(&self) {}

    /// Whether the named top-level object exists
    fn object_exists(&self, path: &str) -> bool;

    /// Whether core services and object managers are loaded
    fn services_loaded(&self) -> bool;

    /// Whether a valid local player object exists
    fn valid_local_player(&self) -> bool;

    /// Whether a valid active camera object exists
    fn valid_camera(&self) -> bool;

    /// Name of the session currently joined, or empty
    fn session_name(&self) -> String;

    /// Identifier of the session currently joined, or empty
    fn session_id(&self) -> String;
}

/// The raw signals observed during one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSnapshot {
    /// Top-level application objects are present
    pub runtime_present: bool,
    pub services_loaded: bool,
    pub local_player: bool,
    pub camera: bool,
    pub session_name: String,
    pub session_id: String,
}

impl ProbeSnapshot {
    pub fn not_running() -> Self {
        Self::default()
    }

    pub fn loading() -> Self {
        Self {
            runtime_present: true,
            ..Self::default()
        }
    }

    pub fn menu() -> Self {
        Self {
            runtime_present: true,
            services_loaded: true,
            ..Self::default()
        }
    }

    pub fn in_session(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            runtime_present: true,
            services_loaded: true,
            local_player: true,
            camera: true,
            session_name: name.into(),
            session_id: id.into(),
        }
    }

    /// Phase the inference chain computes for these signals, before debouncing.
    pub fn expected_phase(&self) -> Phase {
        let backend = ScriptedBackend::new([self.clone()]);
        backend.begin_cycle();
        let config = DetectorConfig::default();
        PhaseInferenceEngine::infer(&backend, config.required_objects.as_slice())
    }
}
