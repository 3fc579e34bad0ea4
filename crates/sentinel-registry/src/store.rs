//! JSON Lines trade store.
//!
//! Durable record of all managed trades, one JSON object per line:
//! - Partial file corruption only affects individual lines
//! - Append mode survives interrupted writes
//! - Later lines supersede earlier lines for the same ticket
//!
//! The storage engine supports exactly one writer at a time; the writer
//! handle is guarded by a mutex and lock contention surfaces as the
//! transient `StoreBusy` error, which the write queue retries.

use crate::error::{RegistryError, RegistryResult};
use parking_lot::Mutex;
use sentinel_core::{ManagedTrade, Ticket};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One line of the store file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum StoreLine {
    /// Insert or replace the record for `trade.ticket`.
    Upsert { trade: ManagedTrade },
    /// Tombstone: the ticket was removed.
    Remove { ticket: Ticket },
}

struct StoreWriter {
    writer: BufWriter<File>,
    /// Lines appended since the last compaction, for rotation heuristics.
    lines_since_compact: usize,
}

/// Append-mode JSON Lines store for `ManagedTrade` records.
pub struct TradeStore {
    path: PathBuf,
    writer: Mutex<StoreWriter>,
}

impl TradeStore {
    /// Open (or create) the store and load all surviving records.
    ///
    /// Compacts the file on open: superseded lines and tombstones are
    /// dropped so the file holds one line per live ticket.
    pub fn open(path: impl AsRef<Path>) -> RegistryResult<(Self, Vec<ManagedTrade>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let records = Self::load_lines(&path)?;

        // Rewrite compacted before switching to append mode.
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        for trade in records.values() {
            let line = serde_json::to_string(&StoreLine::Upsert {
                trade: trade.clone(),
            })?;
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;

        info!(
            path = %path.display(),
            records = records.len(),
            "Trade store opened (compacted)"
        );

        let store = Self {
            path,
            writer: Mutex::new(StoreWriter {
                writer,
                lines_since_compact: 0,
            }),
        };
        Ok((store, records.into_values().collect()))
    }

    /// Read and fold the store file into a ticket-keyed map.
    fn load_lines(path: &Path) -> RegistryResult<BTreeMap<Ticket, ManagedTrade>> {
        let mut records = BTreeMap::new();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoreLine>(&line) {
                Ok(StoreLine::Upsert { trade }) => {
                    records.insert(trade.ticket, trade);
                }
                Ok(StoreLine::Remove { ticket }) => {
                    records.remove(&ticket);
                }
                Err(e) => {
                    // A torn final line after a crash is expected; skip it.
                    warn!(line = idx, error = %e, "Skipping unreadable store line");
                }
            }
        }
        Ok(records)
    }

    /// Persist an upsert for the given trade.
    pub fn upsert(&self, trade: &ManagedTrade) -> RegistryResult<()> {
        self.append(&StoreLine::Upsert {
            trade: trade.clone(),
        })
    }

    /// Persist a removal tombstone.
    pub fn remove(&self, ticket: Ticket) -> RegistryResult<()> {
        self.append(&StoreLine::Remove { ticket })
    }

    fn append(&self, line: &StoreLine) -> RegistryResult<()> {
        // Single-writer constraint: contention is a transient busy error,
        // never a silent queueing behind another writer.
        let mut guard = self.writer.try_lock().ok_or_else(|| {
            RegistryError::StoreBusy(format!("store file locked: {}", self.path.display()))
        })?;

        let json = serde_json::to_string(line)?;
        writeln!(guard.writer, "{}", json)?;
        guard.writer.flush()?;
        guard.lines_since_compact += 1;

        debug!(
            path = %self.path.display(),
            lines_since_compact = guard.lines_since_compact,
            "Store line appended"
        );
        Ok(())
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
