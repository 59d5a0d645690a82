use super::Phase;
use crate::probe::ProbeBackend;

/// Engine for inferring the lifecycle phase from probe results
pub struct PhaseInferenceEngine;

impl PhaseInferenceEngine {
    /// Run the decision chain against the backend.
    ///
    /// Each check is a precondition for the next, so the chain stops at the
    /// first one that fails. Never returns `Unknown` or `Leaving`.
    pub fn infer<S: AsRef<str>>(backend: &dyn ProbeBackend, required_objects: &[S]) -> Phase {
        // Priority order: runtime > services > local player > camera
        if !required_objects
            .iter()
            .all(|path| backend.object_exists(path.as_ref()))
        {
            return Phase::NotRunning;
        }

        if !backend.services_loaded() {
            return Phase::Loading;
        }

        if !backend.valid_local_player() {
            return Phase::Menu;
        }

        if !backend.valid_camera() {
            return Phase::Loading;
        }

        Phase::InSession
    }
}

/// One-cycle suppression of a direct exit from `InSession`.
///
/// The first cycle after a session that computes anything other than
/// `InSession` reports `Leaving` instead; the following cycle reports the
/// computed phase.
#[derive(Debug, Default)]
pub struct Debounce {
    was_in_session: bool,
}

impl Debounce {
    pub fn apply(&mut self, computed: Phase) -> Phase {
        let reported = if self.was_in_session && computed != Phase::InSession {
            Phase::Leaving
        } else {
            computed
        };
        self.was_in_session = reported == Phase::InSession;
        reported
    }
}
