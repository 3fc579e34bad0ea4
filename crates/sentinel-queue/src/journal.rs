//! Durable operation journal.
//!
//! JSON Lines file holding every accepted write operation plus an
//! acknowledgement line once it has executed. On startup, operations
//! without an acknowledgement are replayed before the worker accepts new
//! work. Registry operations are idempotent (registration returns the
//! existing record, ownership re-acquire is a no-op, zone flags are
//! monotonic), so a crash between apply and ack cannot double-modify on
//! replay.

use crate::error::{QueueError, QueueResult};
use crate::operation::WriteOperation;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum JournalLine {
    Op { op: WriteOperation },
    Ack { id: Uuid },
}

/// Append-mode JSON Lines journal of pending write operations.
pub struct OperationJournal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl OperationJournal {
    /// Open (or create) the journal, returning unacknowledged operations
    /// in their original enqueue order.
    ///
    /// The file is compacted on open: acknowledged pairs are dropped and
    /// only pending operations are rewritten.
    pub fn open(path: impl AsRef<Path>) -> QueueResult<(Self, Vec<WriteOperation>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QueueError::Journal(e.to_string()))?;
        }

        let pending = Self::load_pending(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| QueueError::Journal(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        for op in &pending {
            let line = serde_json::to_string(&JournalLine::Op { op: op.clone() })
                .map_err(|e| QueueError::Journal(e.to_string()))?;
            writeln!(writer, "{}", line).map_err(|e| QueueError::Journal(e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| QueueError::Journal(e.to_string()))?;

        info!(
            path = %path.display(),
            pending = pending.len(),
            "Operation journal opened"
        );

        Ok((
            Self {
                path,
                writer: Mutex::new(writer),
            },
            pending,
        ))
    }

    fn load_pending(path: &Path) -> QueueResult<Vec<WriteOperation>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(QueueError::Journal(e.to_string())),
        };

        let mut ops: Vec<WriteOperation> = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| QueueError::Journal(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalLine>(&line) {
                Ok(JournalLine::Op { op }) => ops.push(op),
                Ok(JournalLine::Ack { id }) => ops.retain(|op| op.id != id),
                Err(e) => {
                    // Torn final line after a crash; skip.
                    warn!(line = idx, error = %e, "Skipping unreadable journal line");
                }
            }
        }
        Ok(ops)
    }

    /// Record an accepted operation before it enters the queue.
    pub fn record(&self, op: &WriteOperation) -> QueueResult<()> {
        self.append(&JournalLine::Op { op: op.clone() })
    }

    /// Mark an operation as finished (executed or deliberately dropped).
    pub fn acknowledge(&self, id: Uuid) -> QueueResult<()> {
        self.append(&JournalLine::Ack { id })
    }

    fn append(&self, line: &JournalLine) -> QueueResult<()> {
        let json = serde_json::to_string(line).map_err(|e| QueueError::Journal(e.to_string()))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json).map_err(|e| QueueError::Journal(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| QueueError::Journal(e.to_string()))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
