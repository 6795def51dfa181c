//! Session report persistence: load, extend, deduplicate and atomically
//! rewrite the per-session summary CSV.
//!
//! Every append is a read-modify-write of the whole file, so it runs inside a
//! critical section: an in-process mutex plus an advisory lock on a sibling
//! `.lock` file. The new content goes to a temp file in the same directory
//! and is renamed over the report, so readers never see a partial write.
//!
//! The `.lock` file stays next to the report. Unlinking it while another
//! process waits on it would let two writers hold locks on different inodes.

use crate::error::ReportError;
use crate::table::{self, RawTable, Record};
use fs2::FileExt;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Which row survives when several share the identifier columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepPolicy {
    /// Rows already in the report win over newly appended ones.
    #[default]
    First,
    /// The most recently appended row wins.
    Last,
}

impl std::fmt::Display for KeepPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeepPolicy::First => f.write_str("first"),
            KeepPolicy::Last => f.write_str("last"),
        }
    }
}

/// The persisted session summary, one row per model.
#[derive(Debug)]
pub struct SessionReport {
    path: PathBuf,
    nan_representation: String,
    identifier: Vec<String>,
    keep: KeepPolicy,
    guard: Mutex<()>,
}

impl SessionReport {
    pub fn new(
        path: impl Into<PathBuf>,
        nan_representation: impl Into<String>,
        identifier: Vec<String>,
        keep: KeepPolicy,
    ) -> Self {
        Self {
            path: path.into(),
            nan_representation: nan_representation.into(),
            identifier,
            keep,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current report content; empty when the file does not exist yet.
    pub fn load(&self) -> Result<RawTable, ReportError> {
        if !self.path.exists() {
            return Ok(RawTable::default());
        }
        table::read_csv(&self.path)
    }

    /// Append one model row, deduplicate, and rewrite the report in full.
    pub fn append(&self, row: &Record) -> Result<(), ReportError> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());

        let lock_path = self.lock_path();
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| ReportError::io(&lock_path, e))?;
        FileExt::lock_exclusive(&lock_file).map_err(|e| ReportError::io(&lock_path, e))?;

        let mut report = self.load()?;
        add_row(&mut report, row, &self.nan_representation);
        let before = report.rows.len();
        dedup(&mut report, &self.identifier, self.keep)
            .map_err(|detail| ReportError::malformed(&self.path, detail))?;
        if report.rows.len() < before {
            tracing::info!(
                report = %self.path.display(),
                keep = %self.keep,
                "row with existing identifier dropped"
            );
        }

        self.write_atomic(&report)?;
        tracing::debug!(report = %self.path.display(), rows = report.rows.len(), "session report written");
        Ok(())
    }

    fn write_atomic(&self, report: &RawTable) -> Result<(), ReportError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ReportError::io(dir, e))?;
        table::write_records(tmp.as_file_mut(), &report.header, &report.rows, &self.path)?;
        tmp.persist(&self.path)
            .map_err(|e| ReportError::io(&self.path, e.error))?;
        Ok(())
    }

    /// Sibling file `{report}.lock` that carries the advisory lock.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }
}

/// Append `row`, widening the header with any new column names. Cells
/// without a value are filled with `nan_representation`.
pub fn add_row(report: &mut RawTable, row: &Record, nan_representation: &str) {
    let mut added = 0;
    for name in row.names() {
        if !report.header.iter().any(|h| h == name) {
            report.header.push(name.to_string());
            added += 1;
        }
    }
    if added > 0 {
        for existing in &mut report.rows {
            existing.resize(report.header.len(), nan_representation.to_string());
        }
    }

    let cells = report
        .header
        .iter()
        .map(|column| match row.get(column) {
            Some(value) => value.render(nan_representation),
            None => nan_representation.to_string(),
        })
        .collect();
    report.rows.push(cells);
}

/// Drop rows whose identifier cells repeat an earlier (or, for
/// [`KeepPolicy::Last`], a later) row.
pub fn dedup(report: &mut RawTable, identifier: &[String], keep: KeepPolicy) -> Result<(), String> {
    let positions = identifier
        .iter()
        .map(|name| {
            report
                .header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| format!("identifier column '{name}' not in report"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let key = |row: &Vec<String>| -> Vec<String> {
        positions.iter().map(|&p| row[p].clone()).collect()
    };

    let mut seen = HashSet::new();
    let mut keep_row = vec![false; report.rows.len()];
    match keep {
        KeepPolicy::First => {
            for (i, row) in report.rows.iter().enumerate() {
                keep_row[i] = seen.insert(key(row));
            }
        }
        KeepPolicy::Last => {
            for (i, row) in report.rows.iter().enumerate().rev() {
                keep_row[i] = seen.insert(key(row));
            }
        }
    }

    let mut flags = keep_row.into_iter();
    report.rows.retain(|_| flags.next().unwrap_or(false));
    Ok(())
}
