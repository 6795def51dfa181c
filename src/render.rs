//! Output of aggregated tables.
//!
//! Chart renderers live outside this crate; they implement [`TableRenderer`]
//! against the same aggregated tables the CSV meta files are written from.

use crate::aggregate::AggregatedTable;
use crate::error::ReportError;
use crate::table;
use std::path::{Path, PathBuf};

/// Turns one aggregated table into an artifact on disk.
pub trait TableRenderer {
    /// Render `table` for the metric file `logical_name` and return the
    /// path of the artifact written.
    fn render(&self, logical_name: &str, table: &AggregatedTable) -> Result<PathBuf, ReportError>;
}

/// Writes `{prefix}_{logical_name}` CSV meta files into a directory.
#[derive(Debug, Clone)]
pub struct CsvRenderer {
    dir: PathBuf,
    prefix: String,
    nan_representation: String,
}

impl CsvRenderer {
    pub fn new(dir: &Path, prefix: &str, nan_representation: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            nan_representation: nan_representation.to_string(),
        }
    }

    pub fn file_name(&self, logical_name: &str) -> String {
        format!("{}_{}", self.prefix, logical_name)
    }
}

impl TableRenderer for CsvRenderer {
    fn render(&self, logical_name: &str, table: &AggregatedTable) -> Result<PathBuf, ReportError> {
        let path = self.dir.join(self.file_name(logical_name));
        let (header, rows) = table.to_records(&self.nan_representation);
        table::write_csv(&path, &header, &rows)?;
        tracing::debug!(file = %path.display(), rows = rows.len(), "wrote meta file");
        Ok(path)
    }
}
