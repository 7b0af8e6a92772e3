//! Append-only JSONL journal of emitted envelopes.
//!
//! Each line is a [`JournalRecord`]: the envelope plus a journal-assigned
//! sequence number and timestamp. Replaying a journal through a
//! [`StreamReconstructor`] rebuilds the same view the live stream produced.

use crate::errors::{SinkError, StreamError};
use crate::stream::emitter::EventSink;
use crate::stream::envelope::Envelope;
use crate::stream::reconstructor::StreamReconstructor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalRecord {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub envelope: Envelope,
}

struct Inner {
    writer: BufWriter<File>,
    next_sequence: u64,
}

pub struct EventJournal {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl EventJournal {
    /// Open (or create) a journal, continuing its sequence numbering.
    pub fn open(path: &Path) -> Result<Self, StreamError> {
        let io_err = |source| StreamError::Journal {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let next_sequence = if path.exists() {
            Self::read(path)?
                .last()
                .map(|r| r.sequence + 1)
                .unwrap_or(1)
        } else {
            1
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                writer: BufWriter::new(file),
                next_sequence,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one envelope, returning its journal sequence.
    pub fn append(&self, envelope: &Envelope) -> Result<u64, StreamError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let record = JournalRecord {
            sequence: inner.next_sequence,
            recorded_at: Utc::now(),
            envelope: envelope.clone(),
        };
        let line = serde_json::to_string(&record).map_err(|source| StreamError::Encode {
            id: envelope.id.clone(),
            source,
        })?;

        let io_err = |source| StreamError::Journal {
            path: self.path.clone(),
            source,
        };
        writeln!(inner.writer, "{line}").map_err(io_err)?;
        inner.writer.flush().map_err(io_err)?;
        inner.next_sequence += 1;
        Ok(record.sequence)
    }

    /// Read every record, ordered by sequence. Blank lines are skipped.
    pub fn read(path: &Path) -> Result<Vec<JournalRecord>, StreamError> {
        let file = File::open(path).map_err(|source| StreamError::Journal {
            path: path.to_path_buf(),
            source,
        })?;

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| StreamError::Journal {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord = serde_json::from_str(&line)
                .map_err(|source| StreamError::Decode { line: idx + 1, source })?;
            records.push(record);
        }
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    /// Feed a journal through `reconstructor`. Returns the number of envelopes read.
    pub fn replay(path: &Path, reconstructor: &mut StreamReconstructor) -> Result<usize, StreamError> {
        let records = Self::read(path)?;
        let count = records.len();
        for record in records {
            reconstructor.apply(record.envelope);
        }
        Ok(count)
    }
}

impl EventSink for EventJournal {
    fn deliver(&self, envelope: &Envelope) -> Result<(), SinkError> {
        self.append(envelope)?;
        Ok(())
    }
}
