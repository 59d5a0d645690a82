use std::sync::Arc;
use tokio::sync::mpsc;

use crate::detector::{CallbackId, Detector, Phase};

/// Events forwarded from the detector to an async consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The detected phase changed
    Transition { old: Phase, new: Phase },
    /// A session was joined
    SessionJoined { name: String, id: String },
    /// Request to quit
    Quit,
}

/// Register an observer that forwards every transition into `tx`.
///
/// Session metadata is read back from the detector, so joins carry the
/// session's name and id. Sends to a closed channel are dropped.
pub fn forward_transitions(
    detector: &Arc<Detector>,
    tx: mpsc::UnboundedSender<Event>,
) -> CallbackId {
    let weak = Arc::downgrade(detector);
    detector.register_callback(move |old, new| {
        let _ = tx.send(Event::Transition { old, new });

        if new == Phase::InSession {
            if let Some(detector) = weak.upgrade() {
                let _ = tx.send(Event::SessionJoined {
                    name: detector.session_name(),
                    id: detector.session_id(),
                });
            }
        }
    })
}
