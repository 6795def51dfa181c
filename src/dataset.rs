//! Concatenation of per-run metric files into class-indexed datasets.

use crate::error::ReportError;
use crate::table::{self, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the provenance column added by [`build_with_run`].
pub const RUN_COLUMN: &str = "Run";

/// One row of a dataset: its class label and the metric cells.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub label: String,
    pub values: Vec<Value>,
}

/// All runs' rows for one logical metric file of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Name of the class index (the configured class column name).
    pub index_name: String,
    /// Metric column names, excluding the class index.
    pub columns: Vec<String>,
    pub rows: Vec<DataRow>,
}

impl Dataset {
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Class labels in row order (with repeats).
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.label.as_str())
    }

    /// A column is numeric when every present value in it is a number.
    pub fn is_numeric_column(&self, position: usize) -> bool {
        self.rows.iter().all(|row| {
            let value = &row.values[position];
            value.is_missing() || value.as_number().is_some()
        })
    }
}

/// Build one dataset per logical name by concatenating its files in order.
///
/// The first column of each file becomes the class index, renamed to
/// `class_column`. Rows labelled with anything in `drop_rows` are removed.
/// Any unreadable file or column mismatch fails the whole call.
pub fn build(
    paths_by_name: &BTreeMap<String, Vec<PathBuf>>,
    class_column: &str,
    drop_rows: &[String],
) -> Result<BTreeMap<String, Dataset>, ReportError> {
    let mut datasets = BTreeMap::new();
    for (name, paths) in paths_by_name {
        let sources: Vec<(Option<String>, &Path)> =
            paths.iter().map(|p| (None, p.as_path())).collect();
        let dataset = concat(&sources, class_column, drop_rows)?;
        tracing::debug!(name = %name, files = paths.len(), rows = dataset.rows.len(), "built dataset");
        datasets.insert(name.clone(), dataset);
    }
    Ok(datasets)
}

/// Like [`build`], but every row is tagged with a `Run` column holding the
/// numeric part of its run identifier (`run3` becomes `3`).
pub fn build_with_run(
    paths_by_run_by_name: &BTreeMap<String, Vec<(String, PathBuf)>>,
    class_column: &str,
    drop_rows: &[String],
) -> Result<BTreeMap<String, Dataset>, ReportError> {
    let mut datasets = BTreeMap::new();
    for (name, runs) in paths_by_run_by_name {
        let sources: Vec<(Option<String>, &Path)> = runs
            .iter()
            .map(|(run, p)| (Some(run_number(run).to_string()), p.as_path()))
            .collect();
        let dataset = concat(&sources, class_column, drop_rows)?;
        tracing::debug!(name = %name, runs = runs.len(), rows = dataset.rows.len(), "built dataset with run column");
        datasets.insert(name.clone(), dataset);
    }
    Ok(datasets)
}

/// Strip any non-digit prefix from a run identifier.
pub fn run_number(run: &str) -> &str {
    run.trim_start_matches(|c: char| !c.is_ascii_digit())
}

fn concat(
    sources: &[(Option<String>, &Path)],
    class_column: &str,
    drop_rows: &[String],
) -> Result<Dataset, ReportError> {
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for (run, path) in sources {
        let raw = table::read_csv(path)?;
        let file_columns = &raw.header[1..];

        // Map this file's column order onto the first file's order.
        let order: Vec<usize> = match &columns {
            None => {
                columns = Some(file_columns.to_vec());
                (0..file_columns.len()).collect()
            }
            Some(expected) => column_order(expected, file_columns).ok_or_else(|| {
                ReportError::malformed(
                    *path,
                    format!(
                        "columns {:?} do not match {:?} of sibling files",
                        file_columns, expected
                    ),
                )
            })?,
        };

        for record in raw.rows {
            let label = record[0].clone();
            if drop_rows.contains(&label) {
                continue;
            }
            let mut values: Vec<Value> = order
                .iter()
                .map(|&i| Value::parse_cell(&record[i + 1]))
                .collect();
            if let Some(run) = run {
                values.push(Value::Text(run.clone()));
            }
            rows.push(DataRow { label, values });
        }
    }

    let mut columns = columns.unwrap_or_default();
    if sources.iter().any(|(run, _)| run.is_some()) {
        columns.push(RUN_COLUMN.to_string());
    }

    Ok(Dataset {
        index_name: class_column.to_string(),
        columns,
        rows,
    })
}

/// Position of each expected column within `found`, if both hold the same set.
fn column_order(expected: &[String], found: &[String]) -> Option<Vec<usize>> {
    if expected.len() != found.len() {
        return None;
    }
    expected
        .iter()
        .map(|name| found.iter().position(|f| f == name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, content: &str) -> PathBuf {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn by_name(name: &str, paths: Vec<PathBuf>) -> BTreeMap<String, Vec<PathBuf>> {
        let mut map = BTreeMap::new();
        map.insert(name.to_string(), paths);
        map
    }

    #[test]
    fn build_concatenates_runs_in_order() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "run1/m.csv", "label,acc\ncat,0.8\ndog,0.9\n");
        let b = write(&dir, "run2/m.csv", "label,acc\ncat,0.82\ndog,0.95\n");

        let datasets = build(&by_name("m.csv", vec![a, b]), "class", &[]).unwrap();
        let ds = &datasets["m.csv"];
        assert_eq!(ds.index_name, "class");
        assert_eq!(ds.columns, vec!["acc"]);
        let labels: Vec<&str> = ds.labels().collect();
        assert_eq!(labels, vec!["cat", "dog", "cat", "dog"]);
        assert_eq!(ds.rows[2].values[0], Value::Number(0.82));
    }

    #[test]
    fn drop_rows_are_removed_and_unknown_labels_ignored() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "run1/m.csv", "c,acc\ncat,0.8\naccuracy,0.85\ndog,0.9\n");

        let drop = vec!["accuracy".to_string(), "macro avg".to_string()];
        let datasets = build(&by_name("m.csv", vec![a]), "class", &drop).unwrap();
        let ds = &datasets["m.csv"];
        assert!(ds.labels().all(|l| !drop.iter().any(|d| d == l)));
        assert_eq!(ds.rows.len(), 2);
    }

    #[test]
    fn columns_are_aligned_by_name() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "run1/m.csv", "c,acc,f1\ncat,0.8,0.7\n");
        let b = write(&dir, "run2/m.csv", "c,f1,acc\ncat,0.6,0.9\n");

        let datasets = build(&by_name("m.csv", vec![a, b]), "class", &[]).unwrap();
        let ds = &datasets["m.csv"];
        assert_eq!(ds.columns, vec!["acc", "f1"]);
        assert_eq!(ds.rows[1].values, vec![Value::Number(0.9), Value::Number(0.6)]);
    }

    #[test]
    fn mismatched_columns_fail_the_build() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "run1/m.csv", "c,acc\ncat,0.8\n");
        let b = write(&dir, "run2/m.csv", "c,recall\ncat,0.6\n");

        let err = build(&by_name("m.csv", vec![a, b]), "class", &[]).unwrap_err();
        assert!(err.to_string().contains("do not match"));
    }

    #[test]
    fn unreadable_file_fails_the_build() {
        let paths = by_name("m.csv", vec![PathBuf::from("/nonexistent/run1/m.csv")]);
        assert!(build(&paths, "class", &[]).is_err());
    }

    #[test]
    fn build_with_run_tags_rows() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "run1/m.csv", "c,acc\ncat,0.8\n");
        let b = write(&dir, "run12/m.csv", "c,acc\ncat,0.82\n");

        let mut map = BTreeMap::new();
        map.insert(
            "m.csv".to_string(),
            vec![("run1".to_string(), a), ("run12".to_string(), b)],
        );
        let datasets = build_with_run(&map, "class", &[]).unwrap();
        let ds = &datasets["m.csv"];
        assert_eq!(ds.columns, vec!["acc", RUN_COLUMN]);
        assert_eq!(ds.rows[0].values[1], Value::Text("1".to_string()));
        assert_eq!(ds.rows[1].values[1], Value::Text("12".to_string()));
        assert!(!ds.is_numeric_column(1));
        assert!(ds.is_numeric_column(0));
    }

    #[test]
    fn run_number_strips_prefix() {
        assert_eq!(run_number("run3"), "3");
        assert_eq!(run_number("Run_07"), "07");
        assert_eq!(run_number("42"), "42");
    }
}
