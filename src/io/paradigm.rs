//! Paradigm (events table) ingest.
//!
//! Turns a delimited events file (BIDS-style `*_events.tsv`) into a clean
//! [`Paradigm`]:
//!
//! - `onset` is required
//! - `trial_type` defaults to `dummy`, `duration` to `0`, `modulation` to `1`
//! - empty cells and `n/a` count as missing
//!
//! Unlike a screening tool we never drop rows silently: a model built from a
//! partial paradigm is wrong, so any bad row fails the whole read.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use tracing::{debug, warn};

use crate::domain::{Event, Paradigm};
use crate::error::AppError;

/// Condition name used when the table has no `trial_type` column.
pub const DEFAULT_TRIAL_TYPE: &str = "dummy";

/// Show at most this many row errors in the failure message.
const MAX_REPORTED_ROW_ERRORS: usize = 5;

/// A row-level problem in a delimited input table.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Read a paradigm table.
pub fn read_paradigm(path: &Path, delimiter: u8) -> Result<Paradigm, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open events file '{}': {e}", path.display())))?;
    let paradigm = parse_paradigm(file, delimiter)
        .map_err(|e| AppError::new(e.exit_code(), format!("{}: {}", path.display(), e.message())))?;
    debug!(
        path = %path.display(),
        events = paradigm.events.len(),
        conditions = paradigm.conditions().len(),
        "paradigm loaded"
    );
    Ok(paradigm)
}

/// Parse a paradigm from any reader (used by [`read_paradigm`] and tests).
pub fn parse_paradigm<R: std::io::Read>(input: R, delimiter: u8) -> Result<Paradigm, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read events header: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let Some(&onset_idx) = header_map.get("onset") else {
        return Err(AppError::input("Events table has no 'onset' column."));
    };
    let trial_type_idx = header_map.get("trial_type").copied();
    let duration_idx = header_map.get("duration").copied();
    let modulation_idx = header_map.get("modulation").copied();

    if trial_type_idx.is_none() {
        warn!("events table has no 'trial_type' column; all events are modelled as '{DEFAULT_TRIAL_TYPE}'");
    }
    if duration_idx.is_none() {
        warn!("events table has no 'duration' column; durations set to 0");
    }

    let mut events = Vec::new();
    let mut row_errors = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("parse error: {e}"),
                });
                continue;
            }
        };
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }

        match parse_event(&record, onset_idx, trial_type_idx, duration_idx, modulation_idx) {
            Ok(event) => events.push(event),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if !row_errors.is_empty() {
        return Err(AppError::input(format_row_errors("events", &row_errors)));
    }
    if events.is_empty() {
        return Err(AppError::empty("Events table contains no events."));
    }

    Ok(Paradigm::new(events))
}

fn parse_event(
    record: &StringRecord,
    onset_idx: usize,
    trial_type_idx: Option<usize>,
    duration_idx: Option<usize>,
    modulation_idx: Option<usize>,
) -> Result<Event, String> {
    let onset = optional_number(record, Some(onset_idx), "onset")?.ok_or_else(|| "missing onset".to_string())?;

    let duration = optional_number(record, duration_idx, "duration")?.unwrap_or(0.0);
    if duration < 0.0 {
        return Err(format!("negative duration {duration}"));
    }

    let modulation = optional_number(record, modulation_idx, "modulation")?.unwrap_or(1.0);

    let trial_type = match trial_type_idx.and_then(|i| record.get(i)) {
        Some(v) if !is_missing(v) => v.to_string(),
        Some(_) => return Err("missing trial_type".to_string()),
        None => DEFAULT_TRIAL_TYPE.to_string(),
    };

    Ok(Event {
        onset,
        duration,
        trial_type,
        modulation,
    })
}

fn optional_number(record: &StringRecord, idx: Option<usize>, name: &str) -> Result<Option<f64>, String> {
    let Some(raw) = idx.and_then(|i| record.get(i)) else {
        return Ok(None);
    };
    if is_missing(raw) {
        return Ok(None);
    }
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("invalid {name} '{raw}'"))?;
    if !value.is_finite() {
        return Err(format!("non-finite {name} '{raw}'"));
    }
    Ok(Some(value))
}

fn is_missing(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("n/a") || raw.eq_ignore_ascii_case("nan")
}

pub(crate) fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

pub(crate) fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a UTF-8 BOM.
    name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

pub(crate) fn format_row_errors(what: &str, errors: &[RowError]) -> String {
    let mut out = format!("{} invalid {what} row(s):", errors.len());
    for e in errors.iter().take(MAX_REPORTED_ROW_ERRORS) {
        out.push_str(&format!("\n  line {}: {}", e.line, e.message));
    }
    if errors.len() > MAX_REPORTED_ROW_ERRORS {
        out.push_str(&format!("\n  ... and {} more", errors.len() - MAX_REPORTED_ROW_ERRORS));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_bids_style_table() {
        let tsv = "\u{feff}onset\tduration\ttrial_type\n0.0\t2.0\tspeech\n10.5\t2.0\tanimal\n20\tn/a\tspeech\n";
        let p = parse_paradigm(tsv.as_bytes(), b'\t').unwrap();
        assert_eq!(p.events.len(), 3);
        assert_eq!(p.events[1].onset, 10.5);
        assert_eq!(p.events[1].trial_type, "animal");
        assert_eq!(p.events[2].duration, 0.0);
        assert_eq!(p.events[0].modulation, 1.0);
        assert_eq!(p.conditions(), vec!["animal", "speech"]);
    }

    #[test]
    fn missing_optional_columns_get_defaults() {
        let csv = "onset\n1\n3\n";
        let p = parse_paradigm(csv.as_bytes(), b',').unwrap();
        assert!(p.events.iter().all(|e| e.trial_type == DEFAULT_TRIAL_TYPE));
        assert!(p.events.iter().all(|e| e.duration == 0.0 && e.modulation == 1.0));
    }

    #[test]
    fn modulation_column_is_read() {
        let tsv = "onset\tduration\ttrial_type\tmodulation\n0\t1\ta\t0.5\n";
        let p = parse_paradigm(tsv.as_bytes(), b'\t').unwrap();
        assert_eq!(p.events[0].modulation, 0.5);
    }

    #[test]
    fn bad_rows_fail_with_line_numbers() {
        let tsv = "onset\tduration\ttrial_type\n0\t1\ta\nabc\t1\ta\n4\t-1\tb\n";
        let err = parse_paradigm(tsv.as_bytes(), b'\t').unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("line 3: invalid onset"), "{}", err.message());
        assert!(err.message().contains("line 4: negative duration"), "{}", err.message());
    }

    #[test]
    fn onset_column_is_required() {
        let err = parse_paradigm("duration\ttrial_type\n1\ta\n".as_bytes(), b'\t').unwrap_err();
        assert!(err.message().contains("onset"));
    }

    #[test]
    fn empty_table_is_empty_data() {
        let err = parse_paradigm("onset\tduration\n".as_bytes(), b'\t').unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
