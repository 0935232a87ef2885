use alloy::primitives::B256;
use anyhow::{Context, Result};
use oracle_core::{OnchainState, OracleState};
use serde::{Serialize, de::DeserializeOwned};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const CHECKPOINTS_DIR: &str = "checkpoints";
const LATEST_CHECKPOINT_FILE: &str = "latest_checkpoint";
const STATE_FILE: &str = "state.json";

/// JSON persistence for committed checkpoints and the ledger.
///
/// Layout under the root directory:
/// - `checkpoints/<root>.json`, one file per committed tree
/// - `latest_checkpoint`, the root of the newest checkpoint
/// - `state.json`, the last ledger snapshot
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open the store at `dir`, creating the directory tree if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(CHECKPOINTS_DIR))
            .with_context(|| format!("Failed to create store at {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn checkpoint_path(&self, root: &B256) -> PathBuf {
        self.dir.join(CHECKPOINTS_DIR).join(format!("{root}.json"))
    }

    /// Store `checkpoint` under its root and make it the latest one.
    pub fn save_checkpoint(&self, checkpoint: &OnchainState) -> Result<()> {
        let root = checkpoint.merkle_root;
        write_json(&self.checkpoint_path(&root), checkpoint)?;
        write_atomic(
            &self.dir.join(LATEST_CHECKPOINT_FILE),
            format!("{root}\n").as_bytes(),
        )?;
        debug!(root = ?root, slot = checkpoint.slot, "Checkpoint saved");
        Ok(())
    }

    pub fn load_checkpoint(&self, root: &B256) -> Result<Option<OnchainState>> {
        read_json(&self.checkpoint_path(root))
    }

    /// Root stored in the latest checkpoint pointer.
    pub fn latest_root(&self) -> Result<Option<B256>> {
        let path = self.dir.join(LATEST_CHECKPOINT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let root = contents
            .trim()
            .parse::<B256>()
            .with_context(|| format!("Invalid root in {}", path.display()))?;
        Ok(Some(root))
    }

    pub fn latest_checkpoint(&self) -> Result<Option<OnchainState>> {
        match self.latest_root()? {
            Some(root) => self
                .load_checkpoint(&root)?
                .with_context(|| format!("Latest checkpoint {root} is missing"))
                .map(Some),
            None => Ok(None),
        }
    }

    pub fn save_state(&self, state: &OracleState) -> Result<()> {
        write_json(&self.dir.join(STATE_FILE), state)?;
        debug!(slot = ?state.latest_processed_slot, "Ledger snapshot saved");
        Ok(())
    }

    pub fn load_state(&self) -> Result<Option<OracleState>> {
        read_json(&self.dir.join(STATE_FILE))
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Write through a temporary file so readers never see a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
