// src/core/elector/raft/log.rs

//! On-disk consensus log and stable store.
//!
//! The log is an append-only file of CRC-checked, length-prefixed bincode
//! records, mirrored in memory. Truncation and compaction rewrite the file
//! through a temp-then-rename swap. The stable store holds the current
//! term and vote, written atomically before any message that promises them.

use crate::core::elector::raft::fsm::RaftCommand;
use crate::core::errors::ClusterError;
use crc::{CRC_32_ISCSI, Crc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// What a log entry carries: a state-machine command, a voter-set change,
/// or the no-op a fresh leader commits to fence its term.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum LogPayload {
    Noop,
    Command(RaftCommand),
    AddVoter { id: String, addr: SocketAddr },
    RemoveServer { id: String },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub payload: LogPayload,
}

/// The persistent log. Indexing is 1-based; `base_index` is the index the
/// latest snapshot covers (0 when none).
pub struct LogStore {
    path: PathBuf,
    entries: Vec<LogEntry>,
    base_index: u64,
    base_term: u64,
}

impl LogStore {
    pub fn open(path: &Path) -> Result<Self, ClusterError> {
        let mut store = Self {
            path: path.to_path_buf(),
            entries: Vec::new(),
            base_index: 0,
            base_term: 0,
        };
        if path.exists() {
            store.replay()?;
            debug!(
                "Consensus log opened with {} entries (base index {})",
                store.entries.len(),
                store.base_index
            );
        }
        Ok(store)
    }

    fn replay(&mut self) -> Result<(), ClusterError> {
        let mut file = std::fs::File::open(&self.path)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let mut cursor = 0usize;
        while cursor + 8 <= contents.len() {
            let len = u32::from_le_bytes(contents[cursor..cursor + 4].try_into().unwrap()) as usize;
            let crc = u32::from_le_bytes(contents[cursor + 4..cursor + 8].try_into().unwrap());
            let start = cursor + 8;
            let end = start + len;
            if end > contents.len() {
                // A torn tail from a crash mid-append; everything before it
                // is intact.
                warn!("Consensus log has a truncated tail record; discarding it");
                break;
            }
            let payload = &contents[start..end];
            if CASTAGNOLI.checksum(payload) != crc {
                warn!("Consensus log record failed its checksum; discarding the tail");
                break;
            }
            let (entry, _): (LogEntry, _) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
            if self.entries.is_empty() && self.base_index == 0 && entry.index > 1 {
                // Log was compacted below this entry; its predecessor term
                // is recovered from the snapshot at restore time.
                self.base_index = entry.index - 1;
            }
            self.entries.push(entry);
            cursor = end;
        }
        Ok(())
    }

    fn encode_record(entry: &LogEntry) -> Result<Vec<u8>, ClusterError> {
        let payload = bincode::serde::encode_to_vec(entry, bincode::config::standard())?;
        let mut record = Vec::with_capacity(payload.len() + 8);
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(&CASTAGNOLI.checksum(&payload).to_le_bytes());
        record.extend_from_slice(&payload);
        Ok(record)
    }

    /// Appends entries and fsyncs before returning.
    pub fn append(&mut self, entries: &[LogEntry]) -> Result<(), ClusterError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for entry in entries {
            file.write_all(&Self::encode_record(entry)?)?;
        }
        file.sync_data()?;
        self.entries.extend_from_slice(entries);
        Ok(())
    }

    /// Rewrites the whole file from the in-memory mirror, atomically.
    fn rewrite(&self) -> Result<(), ClusterError> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            for entry in &self.entries {
                file.write_all(&Self::encode_record(entry)?)?;
            }
            file.sync_data()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn first_index(&self) -> u64 {
        self.base_index + 1
    }

    pub fn last_index(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.index)
            .unwrap_or(self.base_index)
    }

    pub fn last_term(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.term)
            .unwrap_or(self.base_term)
    }

    /// The term of `index`, if known. The snapshot base counts as known.
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        if index == self.base_index {
            return Some(self.base_term);
        }
        self.get(index).map(|e| e.term)
    }

    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        if index <= self.base_index {
            return None;
        }
        self.entries.get((index - self.base_index - 1) as usize)
    }

    pub fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        if index <= self.base_index {
            return self.entries.clone();
        }
        let skip = (index - self.base_index - 1) as usize;
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Drops `index` and everything after it (conflict resolution).
    pub fn truncate_from(&mut self, index: u64) -> Result<(), ClusterError> {
        if index <= self.base_index {
            return Err(ClusterError::Consistency(format!(
                "cannot truncate into compacted log (index {index}, base {})",
                self.base_index
            )));
        }
        let keep = (index - self.base_index - 1) as usize;
        if keep < self.entries.len() {
            self.entries.truncate(keep);
            self.rewrite()?;
        }
        Ok(())
    }

    /// Drops everything up to and including `index` after a snapshot.
    pub fn compact_to(&mut self, index: u64, term: u64) -> Result<(), ClusterError> {
        if index <= self.base_index {
            return Ok(());
        }
        let drop = (index - self.base_index).min(self.entries.len() as u64) as usize;
        self.entries.drain(..drop);
        self.base_index = index;
        self.base_term = term;
        self.rewrite()?;
        Ok(())
    }

    /// Resets the log to sit on top of an installed snapshot.
    pub fn reset_to(&mut self, index: u64, term: u64) -> Result<(), ClusterError> {
        self.entries.clear();
        self.base_index = index;
        self.base_term = term;
        self.rewrite()?;
        Ok(())
    }

    /// Recovers the base term after a restart with a compacted log.
    pub fn set_base(&mut self, index: u64, term: u64) {
        if self.base_index == index {
            self.base_term = term;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Durable {current_term, voted_for}, written atomically before the node
/// makes any promise that depends on them.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct HardState {
    pub current_term: u64,
    pub voted_for: Option<String>,
}

pub struct StableStore {
    path: PathBuf,
}

impl StableStore {
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<HardState, ClusterError> {
        match std::fs::read(&self.path) {
            Ok(contents) => Ok(serde_json::from_slice(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HardState::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, state: &HardState) -> Result<(), ClusterError> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
