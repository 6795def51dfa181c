//! Cell values and delimited-text table I/O.

use crate::error::ReportError;
use std::io::Write;
use std::path::Path;

/// A single table cell or metadata scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl Value {
    /// Interpret a raw CSV cell: empty and `nan` are missing, numbers become
    /// `Number`, everything else stays text.
    pub fn parse_cell(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
            return Value::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Text(raw.to_string()),
        }
    }

    /// Numeric view of the cell, if it has one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// True for `Missing` and for NaN numbers.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Missing => true,
            Value::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Render for output, substituting `nan_representation` for missing values.
    pub fn render(&self, nan_representation: &str) -> String {
        if self.is_missing() {
            return nan_representation.to_string();
        }
        self.to_string()
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Missing => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Format a float so whole numbers keep a trailing `.0` (`3.0`, not `3`).
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.1}")
    } else {
        format!("{n}")
    }
}

/// Named values that keep insertion order. Setting an existing name
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Append every field of `other`, replacing same-named fields.
    pub fn extend(&mut self, other: Record) {
        for (name, value) in other.fields {
            self.set(name, value);
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Header plus raw string rows, as read from a CSV file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Read a CSV file with a header row.
///
/// Ragged rows and a missing header are reported as malformed.
pub fn read_csv(path: &Path) -> Result<RawTable, ReportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| ReportError::csv(path, e))?;

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| ReportError::csv(path, e))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if header.is_empty() {
        return Err(ReportError::malformed(path, "missing header row"));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ReportError::csv(path, e))?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }

    Ok(RawTable { header, rows })
}

/// Write a header and rows as CSV into any writer.
pub fn write_records<W: Write>(
    writer: W,
    header: &[String],
    rows: &[Vec<String>],
    path: &Path,
) -> Result<(), ReportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(header)
        .map_err(|e| ReportError::csv(path, e))?;
    for row in rows {
        csv_writer
            .write_record(row)
            .map_err(|e| ReportError::csv(path, e))?;
    }
    csv_writer.flush().map_err(|e| ReportError::io(path, e))?;
    Ok(())
}

/// Create (or truncate) `path` and write the table into it.
pub fn write_csv(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<(), ReportError> {
    let file = std::fs::File::create(path).map_err(|e| ReportError::io(path, e))?;
    write_records(file, header, rows, path)
}
