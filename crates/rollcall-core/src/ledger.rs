//! Append-only attendance ledger.
//!
//! One CSV row per student per day, with header `Name,RegisterNumber,Date,Time`.
//! The exactly-once-per-day rule is checked under a mutex before every
//! append, so the ledger may be shared between threads.

use crate::identity::Identity;
use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub const LEDGER_HEADER: [&str; 4] = ["Name", "RegisterNumber", "Date", "Time"];
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger csv: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub identity: Identity,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// Outcome of [`AttendanceLedger::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// The student already has a record for that date; nothing was written.
    AlreadyRecorded,
}

#[derive(Default)]
struct LedgerState {
    records: Vec<AttendanceRecord>,
    seen: HashSet<(Identity, NaiveDate)>,
}

impl LedgerState {
    fn push(&mut self, record: AttendanceRecord) -> bool {
        if !self.seen.insert((record.identity.clone(), record.date)) {
            return false;
        }
        self.records.push(record);
        true
    }
}

pub struct AttendanceLedger {
    path: Option<PathBuf>,
    state: Mutex<LedgerState>,
}

impl AttendanceLedger {
    /// Open the ledger at `path`, creating it (with header) if absent.
    ///
    /// Rows that cannot be parsed are skipped with a warning rather than
    /// making the whole ledger unusable.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let io_err = |source: std::io::Error| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut state = LedgerState::default();
        let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        if has_content {
            let mut reader = csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .flexible(true)
                .from_path(path)?;
            for result in reader.records() {
                let row = match result {
                    Ok(row) => row,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable ledger row");
                        continue;
                    }
                };
                let line = row.position().map(|p| p.line()).unwrap_or(0);
                match parse_row(&row) {
                    Some(record) => {
                        if !state.push(record) {
                            tracing::warn!(line, "duplicate ledger row for the same day ignored");
                        }
                    }
                    None => tracing::warn!(line, "skipping malformed ledger row"),
                }
            }
            terminate_last_line(path).map_err(io_err)?;
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            let mut writer = csv::Writer::from_path(path)?;
            writer.write_record(LEDGER_HEADER)?;
            writer.flush().map_err(io_err)?;
        }

        tracing::info!(path = %path.display(), records = state.records.len(), "opened attendance ledger");

        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    /// A ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record attendance for `identity` on `date`, unless it already exists.
    ///
    /// The time is stored at second precision.
    pub fn record(
        &self,
        identity: &Identity,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<RecordOutcome, LedgerError> {
        let mut state = self.lock();

        if state.seen.contains(&(identity.clone(), date)) {
            tracing::debug!(%identity, %date, "attendance already recorded");
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let record = AttendanceRecord {
            identity: identity.clone(),
            date,
            time: time.with_nanosecond(0).unwrap_or(time),
        };
        if let Some(path) = &self.path {
            append_row(path, &record)?;
        }
        state.push(record);

        tracing::info!(%identity, %date, "attendance recorded");
        Ok(RecordOutcome::Recorded)
    }

    /// Every record for `date`, in the order they were written.
    pub fn query(&self, date: NaiveDate) -> Vec<AttendanceRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.date == date)
            .cloned()
            .collect()
    }

    pub fn present(&self, date: NaiveDate) -> BTreeSet<Identity> {
        self.query(date).into_iter().map(|r| r.identity).collect()
    }

    /// Identities in `all` without a record on `date`.
    pub fn absent<'a, I>(&self, date: NaiveDate, all: I) -> BTreeSet<Identity>
    where
        I: IntoIterator<Item = &'a Identity>,
    {
        let present = self.present(date);
        all.into_iter()
            .filter(|identity| !present.contains(*identity))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // State is only mutated after a successful write, so a poisoned
        // guard still holds a consistent ledger.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Make sure the next append starts on its own line, even when the file was
/// last saved by an editor that drops the final newline.
fn terminate_last_line(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().read(true).append(true).open(path)?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        tracing::debug!(path = %path.display(), "ledger lacks a trailing newline, adding one");
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn append_row(path: &Path, record: &AttendanceRecord) -> Result<(), LedgerError> {
    let io_err = |source: std::io::Error| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = OpenOptions::new().append(true).open(path).map_err(io_err)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    let date = record.date.format(DATE_FORMAT).to_string();
    let time = record.time.format(TIME_FORMAT).to_string();
    writer.write_record([
        record.identity.name(),
        record.identity.register_number(),
        date.as_str(),
        time.as_str(),
    ])?;
    writer.flush().map_err(io_err)?;
    Ok(())
}

fn parse_row(row: &csv::StringRecord) -> Option<AttendanceRecord> {
    let identity = Identity::new(row.get(0)?, row.get(1)?).ok()?;
    let date = NaiveDate::parse_from_str(row.get(2)?, DATE_FORMAT).ok()?;
    let time = NaiveTime::parse_from_str(row.get(3)?, TIME_FORMAT).ok()?;
    Some(AttendanceRecord { identity, date, time })
}
