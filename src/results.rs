use csv::{ReaderBuilder, StringRecord, Trim};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

const DRIVER_COLUMNS: &[&str] = &["driver"];
const POSITION_COLUMNS: &[&str] = &["actual_position", "position"];
const RACE_NAME_COLUMNS: &[&str] = &["race_name", "race"];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("malformed data at line {line}: {reason}")]
    Malformed { line: u64, reason: String },
    #[error("unable to read results: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaceResult {
    pub driver: String,
    /// `None` when the file has no classified position for the driver.
    pub position: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ResultFile {
    pub rows: Vec<RaceResult>,
    /// Distinct non-empty values of the race name column, if the file has one.
    pub race_names: BTreeSet<String>,
    pub missing_positions: usize,
}

impl ResultFile {
    /// The race name column's value when it holds exactly one distinct value.
    pub fn single_race_name(&self) -> Option<&str> {
        if self.race_names.len() == 1 {
            self.race_names.iter().next().map(String::as_str)
        } else {
            None
        }
    }
}

fn find_column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_position(raw: &str, line: u64) -> Result<Option<u32>, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() || ["nan", "na", "null", "dnf"].iter().any(|n| raw.eq_ignore_ascii_case(n)) {
        return Ok(None);
    }
    let malformed = || ValidationError::Malformed {
        line,
        reason: format!("position {:?} is not a positive integer", raw),
    };
    if let Ok(n) = raw.parse::<u32>() {
        return if n == 0 { Err(malformed()) } else { Ok(Some(n)) };
    }
    // float-formatted integers such as "3.0" are accepted
    let value: f64 = raw.parse().map_err(|_| malformed())?;
    if value.fract() == 0.0 && value >= 1.0 && value <= f64::from(u32::MAX) {
        Ok(Some(value as u32))
    } else {
        Err(malformed())
    }
}

/// Reads and validates a race results CSV. Missing positions are accepted and counted.
pub fn read_results(path: &Path) -> Result<ResultFile, ValidationError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .map_err(|err| into_validation(err, 0))?;
    let headers = reader
        .headers()
        .map_err(|err| into_validation(err, 1))?
        .clone();

    let driver_col = find_column(&headers, DRIVER_COLUMNS);
    let position_col = find_column(&headers, POSITION_COLUMNS);
    let mut missing = Vec::new();
    if driver_col.is_none() {
        missing.push("Driver".to_string());
    }
    if position_col.is_none() {
        missing.push("Actual_Position".to_string());
    }
    let (driver_col, position_col) = match (driver_col, position_col) {
        (Some(d), Some(p)) => (d, p),
        _ => return Err(ValidationError::MissingColumns(missing)),
    };
    let race_col = find_column(&headers, RACE_NAME_COLUMNS);

    let mut file = ResultFile::default();
    let mut seen = FxHashSet::default();
    for (index, record) in reader.records().enumerate() {
        let line = index as u64 + 2;
        let record = record.map_err(|err| into_validation(err, line))?;
        let driver = record.get(driver_col).unwrap_or_default();
        if driver.is_empty() {
            return Err(ValidationError::Malformed {
                line,
                reason: "empty driver".to_string(),
            });
        }
        if !seen.insert(driver.to_string()) {
            return Err(ValidationError::Malformed {
                line,
                reason: format!("driver {:?} appears more than once", driver),
            });
        }
        let position = parse_position(record.get(position_col).unwrap_or_default(), line)?;
        if position.is_none() {
            file.missing_positions += 1;
        }
        if let Some(name) = race_col.and_then(|c| record.get(c)).filter(|n| !n.is_empty()) {
            file.race_names.insert(name.to_string());
        }
        file.rows.push(RaceResult {
            driver: driver.to_string(),
            position,
        });
    }

    if file.missing_positions > 0 {
        warn!(
            path = %path.display(),
            missing = file.missing_positions,
            rows = file.rows.len(),
            "results contain rows without a position"
        );
    }
    Ok(file)
}

fn into_validation(err: csv::Error, fallback_line: u64) -> ValidationError {
    let line = err.position().map_or(fallback_line, csv::Position::line);
    match err.into_kind() {
        csv::ErrorKind::Io(io) => ValidationError::Io(io),
        kind => ValidationError::Malformed {
            line,
            reason: format!("{:?}", kind),
        },
    }
}
