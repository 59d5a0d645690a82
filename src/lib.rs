//! Background detection of a monitored application's lifecycle phase.
//!
//! A [`Detector`] polls a [`ProbeBackend`] on a dedicated thread, infers
//! whether the application is not running, at a menu, loading, in a session
//! or leaving one, and notifies registered observers on every transition.

pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod probe;

pub use config::DetectorConfig;
pub use detector::{CallbackId, Detector, Phase, StateChangeCallback};
pub use error::{Error, Result};
pub use events::Event;
pub use probe::{ProbeBackend, ProbeScript, ProbeSnapshot, ScriptedBackend};
