//! Per-class aggregation of datasets with a fixed registry of reductions.

use crate::dataset::Dataset;
use crate::table::format_number;
use std::collections::HashMap;

/// A named reduction over the values of one column within one group.
///
/// Missing values are skipped before the reduction is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    Mean,
    /// Sample standard deviation (n - 1).
    Std,
    /// Sample variance (n - 1).
    Var,
    Min,
    Max,
    Median,
    Sum,
    Count,
}

impl Aggregation {
    pub const ALL: [Aggregation; 8] = [
        Aggregation::Mean,
        Aggregation::Std,
        Aggregation::Var,
        Aggregation::Min,
        Aggregation::Max,
        Aggregation::Median,
        Aggregation::Sum,
        Aggregation::Count,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Aggregation::Mean => "mean",
            Aggregation::Std => "std",
            Aggregation::Var => "var",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Median => "median",
            Aggregation::Sum => "sum",
            Aggregation::Count => "count",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Reduce `values` (no NaNs) to one number. Empty input gives NaN, except
    /// for `sum` and `count` which give 0.
    pub fn apply(&self, values: &[f64]) -> f64 {
        let n = values.len();
        match self {
            Aggregation::Count => n as f64,
            Aggregation::Sum => values.iter().sum(),
            _ if n == 0 => f64::NAN,
            Aggregation::Mean => mean(values),
            Aggregation::Var => sample_variance(values),
            Aggregation::Std => sample_variance(values).sqrt(),
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Median => median(values),
        }
    }
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (n - 1) as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// One row per group, one column per (source column, aggregation) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTable {
    pub index_name: String,
    /// Group labels in first-seen order.
    pub labels: Vec<String>,
    /// Column names `{source_column}_{aggregation}`.
    pub columns: Vec<String>,
    /// `values[row][column]`.
    pub values: Vec<Vec<f64>>,
}

impl AggregatedTable {
    pub fn get(&self, label: &str, column: &str) -> Option<f64> {
        let row = self.labels.iter().position(|l| l == label)?;
        let col = self.columns.iter().position(|c| c == column)?;
        Some(self.values[row][col])
    }

    /// Header and string rows, with NaN cells rendered as `nan_representation`.
    pub fn to_records(&self, nan_representation: &str) -> (Vec<String>, Vec<Vec<String>>) {
        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push(self.index_name.clone());
        header.extend(self.columns.iter().cloned());

        let rows = self
            .labels
            .iter()
            .zip(&self.values)
            .map(|(label, values)| {
                let mut row = Vec::with_capacity(values.len() + 1);
                row.push(label.clone());
                row.extend(values.iter().map(|v| {
                    if v.is_nan() {
                        nan_representation.to_string()
                    } else {
                        format_number(*v)
                    }
                }));
                row
            })
            .collect();

        (header, rows)
    }
}

/// Group `dataset` by `group_by` and apply every aggregation to every
/// numeric column.
///
/// `group_by` is normally the class index name; naming one of the dataset's
/// columns groups by that column's rendered values instead. Columns in
/// `exclude_columns` are dropped before grouping. Output columns are ordered
/// by source column, then by aggregation in the given order.
pub fn aggregate(
    dataset: &Dataset,
    group_by: &str,
    metrics: &[Aggregation],
    exclude_columns: &[String],
) -> AggregatedTable {
    let group_column = if group_by == dataset.index_name {
        None
    } else {
        let position = dataset.column_position(group_by);
        if position.is_none() {
            tracing::warn!(group_by, index = %dataset.index_name, "unknown group column, grouping by class index");
        }
        position
    };

    let mut labels: Vec<String> = Vec::new();
    let mut members: Vec<Vec<usize>> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for (i, row) in dataset.rows.iter().enumerate() {
        let key = match group_column {
            Some(p) => row.values[p].to_string(),
            None => row.label.clone(),
        };
        let group = *seen.entry(key.clone()).or_insert_with(|| {
            labels.push(key);
            members.push(Vec::new());
            labels.len() - 1
        });
        members[group].push(i);
    }

    let source_columns: Vec<usize> = (0..dataset.columns.len())
        .filter(|&p| Some(p) != group_column)
        .filter(|&p| !exclude_columns.contains(&dataset.columns[p]))
        .filter(|&p| dataset.is_numeric_column(p))
        .collect();

    let mut columns = Vec::with_capacity(source_columns.len() * metrics.len());
    for &p in &source_columns {
        for metric in metrics {
            columns.push(format!("{}_{}", dataset.columns[p], metric.name()));
        }
    }

    let values = members
        .iter()
        .map(|rows| {
            let mut out = Vec::with_capacity(columns.len());
            for &p in &source_columns {
                let column_values: Vec<f64> = rows
                    .iter()
                    .filter_map(|&r| dataset.rows[r].values[p].as_number())
                    .filter(|v| !v.is_nan())
                    .collect();
                for metric in metrics {
                    out.push(metric.apply(&column_values));
                }
            }
            out
        })
        .collect();

    let index_name = match group_column {
        Some(p) => dataset.columns[p].clone(),
        None => dataset.index_name.clone(),
    };

    AggregatedTable {
        index_name,
        labels,
        columns,
        values,
    }
}
