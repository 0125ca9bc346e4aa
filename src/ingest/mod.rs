//! Input File Loaders
//!
//! Reads the three study inputs from CSV:
//!
//! - food-event table: `entry_id,subject_id,timestamp,text`
//! - CGM series: `subject_id,timestamp,glucose_mg_dl`
//! - subject metadata: `subject_id,bmi[,age]`
//!
//! Columns are resolved by header name, so extra columns and reordering are
//! tolerated. Malformed rows are skipped with a warning and counted; a file
//! that cannot be opened or lacks a required column is an error. Timestamps
//! accept RFC 3339 or `YYYY-MM-DD HH:MM:SS` (assumed UTC).

use crate::types::{CgmReading, DiaryEntry, SubjectProfile};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from input file loading.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("{path}: missing required column {column:?}")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("{0}: file contains a header but no data rows")]
    Empty(PathBuf),
}

/// Split a CSV line respecting quoted fields (handles commas inside quotes).
/// Returns owned strings because quoted fields need unquoting.
fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    // Check for escaped quote ("")
                    if chars.peek() == Some(&'"') {
                        current.push('"');
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            ',' if !in_quotes => {
                fields.push(current.clone());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Parse a timestamp as RFC 3339 or naive `YYYY-MM-DD HH:MM:SS` (UTC).
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Header/rows pair plus the column index resolver.
struct CsvTable {
    path: PathBuf,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    fn load(path: &Path) -> Result<Self, IngestError> {
        let file = File::open(path).map_err(|e| IngestError::Io(path.to_path_buf(), e))?;
        let reader = BufReader::new(file);

        let mut lines = reader.lines();
        let header_line = lines
            .next()
            .transpose()
            .map_err(|e| IngestError::Io(path.to_path_buf(), e))?
            .unwrap_or_default();
        let header: Vec<String> = csv_split(&header_line)
            .into_iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let mut rows = Vec::new();
        for line in lines {
            let line = line.map_err(|e| IngestError::Io(path.to_path_buf(), e))?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(csv_split(&line));
        }

        if rows.is_empty() {
            return Err(IngestError::Empty(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            header,
            rows,
        })
    }

    fn column(&self, name: &'static str) -> Result<usize, IngestError> {
        self.header
            .iter()
            .position(|h| h == name)
            .ok_or(IngestError::MissingColumn {
                path: self.path.clone(),
                column: name,
            })
    }
}

fn field<'a>(row: &'a [String], idx: usize) -> Option<&'a str> {
    row.get(idx).map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// Load the food-event table.
pub fn load_diary_entries(path: &Path) -> Result<Vec<DiaryEntry>, IngestError> {
    let table = CsvTable::load(path)?;
    let id_col = table.column("entry_id")?;
    let subject_col = table.column("subject_id")?;
    let ts_col = table.column("timestamp")?;
    let text_col = table.column("text")?;

    let mut entries = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;
    for (line_no, row) in table.rows.iter().enumerate() {
        let parsed = (|| {
            Some(DiaryEntry {
                id: field(row, id_col)?.to_string(),
                subject_id: field(row, subject_col)?.to_string(),
                timestamp: parse_timestamp(field(row, ts_col)?)?,
                text: field(row, text_col)?.to_string(),
            })
        })();
        match parsed {
            Some(entry) => entries.push(entry),
            None => {
                skipped += 1;
                warn!(path = %path.display(), line = line_no + 2, "Skipping malformed diary row");
            }
        }
    }

    info!(path = %path.display(), loaded = entries.len(), skipped, "Loaded diary entries");
    Ok(entries)
}

/// Load the CGM time series.
pub fn load_cgm_readings(path: &Path) -> Result<Vec<CgmReading>, IngestError> {
    let table = CsvTable::load(path)?;
    let subject_col = table.column("subject_id")?;
    let ts_col = table.column("timestamp")?;
    let glucose_col = table.column("glucose_mg_dl")?;

    let mut readings = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;
    for (line_no, row) in table.rows.iter().enumerate() {
        let parsed = (|| {
            let glucose: f64 = field(row, glucose_col)?.parse().ok()?;
            if !glucose.is_finite() || glucose <= 0.0 {
                return None;
            }
            Some(CgmReading {
                subject_id: field(row, subject_col)?.to_string(),
                timestamp: parse_timestamp(field(row, ts_col)?)?,
                glucose_mg_dl: glucose,
            })
        })();
        match parsed {
            Some(reading) => readings.push(reading),
            None => {
                skipped += 1;
                warn!(path = %path.display(), line = line_no + 2, "Skipping malformed CGM row");
            }
        }
    }

    info!(path = %path.display(), loaded = readings.len(), skipped, "Loaded CGM readings");
    Ok(readings)
}

/// Load subject metadata.
pub fn load_subject_profiles(path: &Path) -> Result<Vec<SubjectProfile>, IngestError> {
    let table = CsvTable::load(path)?;
    let subject_col = table.column("subject_id")?;
    let bmi_col = table.column("bmi")?;
    let age_col = table.header.iter().position(|h| h == "age");

    let mut profiles = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;
    for (line_no, row) in table.rows.iter().enumerate() {
        let parsed = (|| {
            let bmi: f64 = field(row, bmi_col)?.parse().ok()?;
            if !bmi.is_finite() || bmi <= 0.0 {
                return None;
            }
            Some(SubjectProfile {
                subject_id: field(row, subject_col)?.to_string(),
                bmi,
                age: age_col
                    .and_then(|c| field(row, c))
                    .and_then(|s| s.parse().ok()),
            })
        })();
        match parsed {
            Some(profile) => profiles.push(profile),
            None => {
                skipped += 1;
                warn!(path = %path.display(), line = line_no + 2, "Skipping malformed subject row");
            }
        }
    }

    info!(path = %path.display(), loaded = profiles.len(), skipped, "Loaded subject profiles");
    Ok(profiles)
}
