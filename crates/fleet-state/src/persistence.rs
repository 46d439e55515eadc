//! Crash-safe snapshot persistence.
//!
//! `save` serializes under the store's read lock, releases it, and only then
//! touches the disk: the bytes go to a temp file that is renamed over
//! `state.json` once its contents are synced to disk. A crash at any point leaves either the previous snapshot or
//! the new one, never a partial file.
//!
//! There is no cross-process locking. Two orchestrators sharing one session
//! directory is unsupported.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use fleet_contracts::error::{FleetError, FleetResult};

use crate::store::{SessionState, SessionStore};

/// Reads and writes snapshots at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Atomically replace the snapshot with the store's current state.
    pub fn save(&self, store: &SessionStore) -> FleetResult<()> {
        // `snapshot()` clones under the read lock; serialization and I/O
        // happen after it is released.
        let state = store.snapshot();
        self.save_state(&state)
    }

    pub fn save_state(&self, state: &SessionState) -> FleetResult<()> {
        let data = serde_json::to_vec_pretty(state).map_err(|e| FleetError::Persistence {
            reason: format!("failed to serialize state: {}", e),
        })?;

        let tmp = self.tmp_path();
        write_synced(&tmp, &data).map_err(|e| FleetError::Persistence {
            reason: format!("failed to write '{}': {}", tmp.display(), e),
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| FleetError::Persistence {
            reason: format!(
                "failed to rename '{}' to '{}': {}",
                tmp.display(),
                self.path.display(),
                e
            ),
        })?;

        debug!(
            path = %self.path.display(),
            bytes = data.len(),
            agents = state.agents.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Load the snapshot into a new store.
    pub fn load(&self) -> FleetResult<SessionStore> {
        Ok(SessionStore::from_state(self.load_state()?))
    }

    pub fn load_state(&self) -> FleetResult<SessionState> {
        let data = std::fs::read(&self.path).map_err(|e| FleetError::Persistence {
            reason: if e.kind() == std::io::ErrorKind::NotFound {
                format!("state file not found: '{}'", self.path.display())
            } else {
                format!("failed to read '{}': {}", self.path.display(), e)
            },
        })?;
        serde_json::from_slice(&data).map_err(|e| FleetError::Persistence {
            reason: format!("failed to parse state: {}", e),
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Write `data` and flush it to the device before returning.
fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}
