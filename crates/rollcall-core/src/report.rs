//! Per-run attendance reports.
//!
//! At the end of a run every registered student is listed as Present or
//! Absent and the table is written to `attendance_YYYY-MM-DD_HH-MM-SS.csv`.
//! The timestamp in the file name is what [`list_reports`] uses to build
//! the history view.

use crate::identity::Identity;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const REPORT_PREFIX: &str = "attendance_";
const REPORT_EXTENSION: &str = "csv";
const REPORT_TIMESTAMP: &str = "%Y-%m-%d_%H-%M-%S";

/// How far back the history view looks by default.
pub const DEFAULT_HISTORY_DAYS: i64 = 90;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing report: {0}")]
    Write(#[source] std::io::Error),
    #[error("report csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("{0} is not an attendance_YYYY-MM-DD_HH-MM-SS.csv report")]
    UnrecognisedName(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Present,
    Absent,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Present => f.write_str("Present"),
            Status::Absent => f.write_str("Absent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Register Number")]
    pub register_number: String,
    #[serde(rename = "Status")]
    pub status: Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    generated_at: NaiveDateTime,
    rows: Vec<ReportRow>,
}

impl SessionReport {
    /// One row per identity in `all`, ordered by register number then name.
    pub fn build<'a, I>(all: I, present: &HashSet<Identity>, generated_at: NaiveDateTime) -> Self
    where
        I: IntoIterator<Item = &'a Identity>,
    {
        let mut rows: Vec<ReportRow> = all
            .into_iter()
            .map(|identity| ReportRow {
                name: identity.name().to_string(),
                register_number: identity.register_number().to_string(),
                status: if present.contains(identity) {
                    Status::Present
                } else {
                    Status::Absent
                },
            })
            .collect();
        rows.sort_by(|a, b| {
            a.register_number
                .cmp(&b.register_number)
                .then_with(|| a.name.cmp(&b.name))
        });
        Self { generated_at, rows }
    }

    pub fn generated_at(&self) -> NaiveDateTime {
        self.generated_at
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn summary(&self) -> ReportSummary {
        let present = self
            .rows
            .iter()
            .filter(|r| r.status == Status::Present)
            .count();
        ReportSummary {
            total: self.rows.len(),
            present,
            absent: self.rows.len() - present,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{REPORT_PREFIX}{}.{REPORT_EXTENSION}",
            self.generated_at.format(REPORT_TIMESTAMP)
        )
    }

    /// Write the report as CSV with header `Name,Register Number,Status`.
    pub fn write<W: Write>(&self, out: W) -> Result<(), ReportError> {
        let mut writer = csv::Writer::from_writer(out);
        for row in &self.rows {
            writer.serialize(row)?;
        }
        // An empty report still gets its header.
        if self.rows.is_empty() {
            writer.write_record(["Name", "Register Number", "Status"])?;
        }
        writer.flush().map_err(ReportError::Write)?;
        Ok(())
    }

    /// Write the report into `dir`, returning the file path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        let io_err = |path: &Path, source: std::io::Error| ReportError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let path = dir.join(self.file_name());
        let file = fs::File::create(&path).map_err(|e| io_err(&path, e))?;
        self.write(file).map_err(|e| match e {
            ReportError::Write(source) => io_err(&path, source),
            other => other,
        })?;

        let summary = self.summary();
        tracing::info!(
            path = %path.display(),
            total = summary.total,
            present = summary.present,
            absent = summary.absent,
            "wrote session report"
        );
        Ok(path)
    }

    /// Read a report back; the timestamp comes from its file name.
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let generated_at = report_timestamp(path)
            .ok_or_else(|| ReportError::UnrecognisedName(path.to_path_buf()))?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        let rows = reader
            .deserialize::<ReportRow>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { generated_at, rows })
    }
}

/// Parse the timestamp out of an `attendance_YYYY-MM-DD_HH-MM-SS.csv` name.
pub fn report_timestamp(path: &Path) -> Option<NaiveDateTime> {
    if path.extension()?.to_str()? != REPORT_EXTENSION {
        return None;
    }
    let stamp = path.file_stem()?.to_str()?.strip_prefix(REPORT_PREFIX)?;
    NaiveDateTime::parse_from_str(stamp, REPORT_TIMESTAMP).ok()
}

/// Reports in `dir` generated within `max_age` of `now`, newest first.
///
/// A missing directory simply has no reports. Files that do not follow the
/// report naming scheme are ignored.
pub fn list_reports(
    dir: &Path,
    now: NaiveDateTime,
    max_age: Duration,
) -> Result<Vec<(NaiveDateTime, PathBuf)>, ReportError> {
    let io_err = |source: std::io::Error| ReportError::Io {
        path: dir.to_path_buf(),
        source,
    };
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut reports = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let Some(stamp) = report_timestamp(&path) else {
            continue;
        };
        if now - stamp <= max_age {
            reports.push((stamp, path));
        }
    }
    reports.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn id(key: &str) -> Identity {
        Identity::from_key(key).unwrap()
    }

    fn stamp(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(h, 30, 15)
            .unwrap()
    }

    fn sample() -> SessionReport {
        let all = [id("Carol_103"), id("Alice_101"), id("Bob_102")];
        let present: HashSet<_> = [id("Bob_102")].into_iter().collect();
        SessionReport::build(all.iter(), &present, stamp(4, 9))
    }

    #[test]
    fn test_build_marks_status_and_sorts() {
        let report = sample();
        let regs: Vec<_> = report.rows().iter().map(|r| r.register_number.as_str()).collect();
        assert_eq!(regs, vec!["101", "102", "103"]);
        assert_eq!(report.rows()[1].status, Status::Present);
        assert_eq!(
            report.summary(),
            ReportSummary { total: 3, present: 1, absent: 2 }
        );
    }

    #[test]
    fn test_write_csv_layout() {
        let mut out = Vec::new();
        sample().write(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Name,Register Number,Status\n\
             Alice,101,Absent\n\
             Bob,102,Present\n\
             Carol,103,Absent\n"
        );
    }

    #[test]
    fn test_empty_report_keeps_header() {
        let report = SessionReport::build(std::iter::empty(), &HashSet::new(), stamp(4, 9));
        let mut out = Vec::new();
        report.write(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Name,Register Number,Status\n");
    }

    #[test]
    fn test_write_to_and_load() {
        let dir = TempDir::new().unwrap();
        let report = sample();
        let path = report.write_to(dir.path()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "attendance_2024-03-04_09-30-15.csv"
        );

        let loaded = SessionReport::load(&path).unwrap();
        assert_eq!(loaded.generated_at(), stamp(4, 9));
        assert_eq!(loaded.rows(), report.rows());
    }

    #[test]
    fn test_list_reports_window_and_order() {
        let dir = TempDir::new().unwrap();
        let present = HashSet::new();
        let all = [id("Alice_101")];
        for at in [stamp(1, 8), stamp(3, 8), stamp(2, 8)] {
            SessionReport::build(all.iter(), &present, at)
                .write_to(dir.path())
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.csv"), "x").unwrap();
        std::fs::write(dir.path().join("attendance_garbage.csv"), "x").unwrap();

        let now = stamp(4, 8);
        let listed = list_reports(dir.path(), now, Duration::days(2)).unwrap();
        let stamps: Vec<_> = listed.iter().map(|(s, _)| *s).collect();
        assert_eq!(stamps, vec![stamp(3, 8), stamp(2, 8)]);
    }

    #[test]
    fn test_list_reports_missing_dir() {
        let dir = TempDir::new().unwrap();
        let listed = list_reports(&dir.path().join("nope"), stamp(4, 8), Duration::days(90)).unwrap();
        assert!(listed.is_empty());
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_not_blamed_on_a_path() {
        let report = SessionReport::build(std::iter::empty(), &HashSet::new(), stamp(4, 9));
        let err = report.write(FullDisk).unwrap_err();
        assert!(matches!(err, ReportError::Write(_)), "{err:?}");
        assert_eq!(err.to_string(), "writing report: disk full");
    }
}
