use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ProbeBackend, ProbeSnapshot};
use crate::error::{Error, Result};

/// A recorded sequence of probe snapshots, one per cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeScript {
    /// Start over from the first step once the script is exhausted
    #[serde(default)]
    pub repeat: bool,
    pub steps: Vec<ProbeSnapshot>,
}

impl ProbeScript {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| Error::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let script: Self = serde_json::from_str(&content).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if script.steps.is_empty() {
            return Err(Error::EmptyScript);
        }
        Ok(script)
    }
}

#[derive(Debug, Default)]
struct Cursor {
    steps: Vec<ProbeSnapshot>,
    next: usize,
    current: ProbeSnapshot,
    cycles: u64,
}

/// Probe backend that replays a fixed snapshot sequence.
///
/// Each `begin_cycle` advances to the next snapshot. Once the steps run out the
/// last snapshot is held, or the script restarts when `repeat` is set. Before
/// the first cycle the application reads as not running.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    cursor: Mutex<Cursor>,
    repeat: bool,
}

impl ScriptedBackend {
    pub fn new(steps: impl IntoIterator<Item = ProbeSnapshot>) -> Self {
        Self {
            cursor: Mutex::new(Cursor {
                steps: steps.into_iter().collect(),
                ..Cursor::default()
            }),
            repeat: false,
        }
    }

    pub fn from_script(script: ProbeScript) -> Self {
        Self {
            repeat: script.repeat,
            ..Self::new(script.steps)
        }
    }

    /// Append a snapshot to the end of the script.
    pub fn push(&self, snapshot: ProbeSnapshot) {
        self.lock().steps.push(snapshot);
    }

    /// Number of cycles started so far
    pub fn cycles(&self) -> u64 {
        self.lock().cycles
    }

    /// Snapshot served to the current cycle
    pub fn current(&self) -> ProbeSnapshot {
        self.lock().current.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProbeBackend for ScriptedBackend {
    fn begin_cycle(&self) {
        let mut cursor = self.lock();
        cursor.cycles += 1;

        if cursor.next >= cursor.steps.len() {
            if !self.repeat || cursor.steps.is_empty() {
                return;
            }
            cursor.next = 0;
        }

        let next = cursor.next;
        cursor.current = cursor.steps[next].clone();
        cursor.next += 1;
    }

    fn object_exists(&self, _path: &str) -> bool {
        self.lock().current.runtime_present
    }

    fn services_loaded(&self) -> bool {
        self.lock().current.services_loaded
    }

    fn valid_local_player(&self) -> bool {
        self.lock().current.local_player
    }

    fn valid_camera(&self) -> bool {
        self.lock().current.camera
    }

    fn session_name(&self) -> String {
        self.lock().current.session_name.clone()
    }

    fn session_id(&self) -> String {
        self.lock().current.session_id.clone()
    }
}
