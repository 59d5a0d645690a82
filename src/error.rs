use std::path::PathBuf;

/// Errors raised while configuring the detector or loading probe scripts.
///
/// Running detectors never surface errors; see [`crate::Detector`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("At least one required object must be configured")]
    NoRequiredObjects,

    #[error("Invalid object path: {0:?}")]
    InvalidObjectPath(String),

    #[error("Probe script has no steps")]
    EmptyScript,
}

pub type Result<T> = std::result::Result<T, Error>;
