//! Student roster: an explicit table of `Name, Register Number, Image Filename`.
//!
//! The whole table is validated when it is loaded. Any invalid row fails the
//! load and every offending row is reported together, so a roster is either
//! fully usable or rejected with a complete list of problems.

use crate::identity::Identity;
use crate::registry::is_image_file;
use serde::Deserialize;
use std::fmt;
use std::io::Read;
use std::path::{Component, Path};
use thiserror::Error;

const COLUMN_NAME: &str = "Name";
const COLUMN_REGISTER_NUMBER: &str = "Register Number";
const COLUMN_IMAGE_FILENAME: &str = "Image Filename";

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster: {0}")]
    Csv(#[from] csv::Error),
    #[error("roster is missing required column {0:?}")]
    MissingColumn(&'static str),
    #[error("roster has {} invalid row(s)", .0.len())]
    InvalidRows(Vec<InvalidRow>),
}

/// A roster row that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRow {
    /// 1-based line number in the source file (the header is line 1).
    pub line: u64,
    pub reason: String,
}

impl fmt::Display for InvalidRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Register Number")]
    register_number: String,
    #[serde(rename = "Image Filename")]
    image_filename: String,
}

/// A validated roster row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    pub identity: Identity,
    /// Image file name relative to the roster's image folder.
    pub image_filename: String,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    rows: Vec<RosterRow>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        let roster = Self::parse(reader)?;
        tracing::info!(path = %path.display(), rows = roster.len(), "loaded roster");
        Ok(roster)
    }

    pub fn from_reader<R: Read>(rdr: R) -> Result<Self, RosterError> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(rdr);
        Self::parse(reader)
    }

    fn parse<R: Read>(mut reader: csv::Reader<R>) -> Result<Self, RosterError> {
        let headers = reader.headers()?.clone();
        for column in [COLUMN_NAME, COLUMN_REGISTER_NUMBER, COLUMN_IMAGE_FILENAME] {
            if !headers.iter().any(|h| h == column) {
                return Err(RosterError::MissingColumn(column));
            }
        }

        let mut rows = Vec::new();
        let mut invalid = Vec::new();

        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    invalid.push(InvalidRow {
                        line,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            let raw: RawRow = match record.deserialize(Some(&headers)) {
                Ok(raw) => raw,
                Err(e) => {
                    invalid.push(InvalidRow {
                        line,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match validate(raw) {
                Ok(row) => rows.push(row),
                Err(reason) => invalid.push(InvalidRow { line, reason }),
            }
        }

        if !invalid.is_empty() {
            return Err(RosterError::InvalidRows(invalid));
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[RosterRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn validate(raw: RawRow) -> Result<RosterRow, String> {
    let identity =
        Identity::new(&raw.name, &raw.register_number).map_err(|e| e.to_string())?;

    let filename = raw.image_filename;
    if filename.is_empty() {
        return Err("image filename is empty".into());
    }
    let path = Path::new(&filename);
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(format!("image filename {filename:?} must be relative to the image folder"));
    }
    if !is_image_file(path) {
        return Err(format!("image filename {filename:?} is not a png/jpg/jpeg file"));
    }

    Ok(RosterRow {
        identity,
        image_filename: filename,
    })
}
