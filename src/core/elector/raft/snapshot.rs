// src/core/elector/raft/snapshot.rs

//! The snapshot store: bounded retention of state-machine snapshots.

use crate::core::errors::ClusterError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How many snapshots are kept on disk.
const RETAIN: usize = 3;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Snapshot {
    pub last_index: u64,
    pub last_term: u64,
    /// The voter configuration as of `last_index`.
    pub voters: HashMap<String, SocketAddr>,
    /// Canonical JSON of the replicated view.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn open(dir: &Path) -> Result<Self, ClusterError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn snapshot_path(&self, index: u64, term: u64) -> PathBuf {
        self.dir.join(format!("snapshot-{index:020}-{term:020}.snap"))
    }

    /// Persists a snapshot atomically, then prunes beyond the retention
    /// depth.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), ClusterError> {
        let path = self.snapshot_path(snapshot.last_index, snapshot.last_term);
        let encoded = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &encoded)?;
        std::fs::rename(&tmp, &path)?;
        debug!(
            "Snapshot saved at index {} term {}",
            snapshot.last_index, snapshot.last_term
        );
        self.prune();
        Ok(())
    }

    /// The newest readable snapshot, skipping any that fail to decode.
    pub fn latest(&self) -> Option<Snapshot> {
        let mut names = self.list();
        names.reverse();
        for path in names {
            match std::fs::read(&path) {
                Ok(contents) => {
                    match bincode::serde::decode_from_slice::<Snapshot, _>(
                        &contents,
                        bincode::config::standard(),
                    ) {
                        Ok((snapshot, _)) => return Some(snapshot),
                        Err(e) => warn!("Skipping unreadable snapshot {}: {e}", path.display()),
                    }
                }
                Err(e) => warn!("Skipping unreadable snapshot {}: {e}", path.display()),
            }
        }
        None
    }

    fn list(&self) -> Vec<PathBuf> {
        let mut names: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| {
                        p.extension().map(|ext| ext == "snap").unwrap_or(false)
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn prune(&self) {
        let names = self.list();
        if names.len() <= RETAIN {
            return;
        }
        for path in &names[..names.len() - RETAIN] {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to prune old snapshot {}: {e}", path.display());
            }
        }
    }
}
