//! Durable run state and population snapshots.
//!
//! Both files live under the run's output directory and are replaced
//! atomically: the new content is written and synced to a sibling temp file
//! which is then renamed over the old one, so a concurrent reader sees either
//! the previous or the next version, never a partial write.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::schema::RunState;

use super::error::CheckpointError;
use super::population::PopulationSnapshot;

/// File name of the run ledger.
pub const RUN_STATE_FILE: &str = "run_state.json";
/// File name of the population snapshot.
pub const POPULATION_FILE: &str = "population.json";

/// Reads and writes checkpoints for one output directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    output_dir: PathBuf,
}

impl CheckpointManager {
    /// Create a manager, creating the output directory if needed.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self, CheckpointError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir).map_err(|e| CheckpointError::io(&output_dir, e))?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn run_state_path(&self) -> PathBuf {
        self.output_dir.join(RUN_STATE_FILE)
    }

    pub fn population_path(&self) -> PathBuf {
        self.output_dir.join(POPULATION_FILE)
    }

    /// Persist the run ledger, replacing the previous checkpoint.
    pub fn save_run_state(&self, state: &RunState) -> Result<(), CheckpointError> {
        write_json_atomic(&self.run_state_path(), state)
    }

    /// Load the run ledger. `Ok(None)` when no checkpoint exists yet.
    pub fn load_run_state(&self) -> Result<Option<RunState>, CheckpointError> {
        read_json(&self.run_state_path())
    }

    /// Load the run ledger, starting fresh if it is missing or unreadable.
    ///
    /// An unreadable ledger is moved aside to `run_state.json.corrupt-<ts>`
    /// so the fresh run does not overwrite it.
    pub fn load_run_state_or_default(&self) -> Result<RunState, CheckpointError> {
        match self.load_run_state() {
            Ok(state) => Ok(state.unwrap_or_default()),
            Err(CheckpointError::Corrupt { path, reason }) => {
                let quarantine = path.with_extension(format!(
                    "json.corrupt-{}",
                    chrono::Utc::now().timestamp()
                ));
                warn!(
                    "Run state {} is corrupt ({}); moving it to {} and starting fresh",
                    path.display(),
                    reason,
                    quarantine.display()
                );
                fs::rename(&path, &quarantine).map_err(|e| CheckpointError::io(&path, e))?;
                Ok(RunState::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Persist a population snapshot.
    pub fn save_population_state(
        &self,
        snapshot: &PopulationSnapshot,
    ) -> Result<(), CheckpointError> {
        write_json_atomic(&self.population_path(), snapshot)
    }

    /// Load the population snapshot. `Ok(None)` when none was saved.
    pub fn load_population_state(&self) -> Result<Option<PopulationSnapshot>, CheckpointError> {
        read_json(&self.population_path())
    }

    pub fn has_population_state(&self) -> bool {
        self.population_path().is_file()
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CheckpointError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension(format!("json.tmp-{}", std::process::id()));

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };

    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp_path);
        return Err(CheckpointError::io(path, e));
    }
    debug!("Checkpoint written: {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CheckpointError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Err(CheckpointError::corrupt(path, e));
        }
        Err(e) => return Err(CheckpointError::io(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| CheckpointError::corrupt(path, e))
}
