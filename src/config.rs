//! Reporter configuration: schema, loading and validation.
//!
//! The file is JSON or TOML (chosen by extension). Validation compiles every
//! pattern and resolves every aggregation name up front, so a bad config
//! fails before any metric file is read.

use crate::aggregate::Aggregation;
use crate::error::ConfigError;
use crate::metadata::{self, ConfigNode, KeyPath};
use crate::report::KeepPolicy;
use crate::scan::NamePattern;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Column holding the model name in session reports.
pub const MODEL_COLUMN: &str = "Models";
/// Column holding the run count in session reports.
pub const RUNS_COLUMN: &str = "Runs";

const DEFAULT_PARTITIONS: [&str; 3] = ["train", "val", "test"];

/// Configuration as written on disk. Optional everywhere so that missing
/// required keys can be reported by name.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    pattern: HashMap<String, String>,
    look_for: Option<Vec<String>>,
    metrics: RawMetrics,
    drop: Vec<String>,
    class_column_name: Option<String>,
    file_prefix: Option<String>,
    nan_representation: String,
    duplicates_identifier: Option<Vec<String>>,
    duplicates_keep: KeepPolicy,
    multiple_entries_in: Vec<String>,
    config_data: Option<serde_json::Value>,
    partitions: Option<Vec<String>>,
    write_model_reports: bool,
    workers: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMetrics {
    model: Option<Vec<String>>,
    session: Option<Vec<String>>,
}

/// A named data split and the file-name pattern that selects it.
#[derive(Debug, Clone)]
pub struct Partition {
    pub name: String,
    pub pattern: NamePattern,
}

/// Validated reporter configuration.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub run_pattern: NamePattern,
    pub look_for: Vec<NamePattern>,
    pub model_directory: Option<NamePattern>,
    pub model_config: Option<NamePattern>,
    /// Checked in order; the first match names a file's partition.
    pub partitions: Vec<Partition>,
    pub model_metrics: Vec<Aggregation>,
    pub session_metrics: Vec<Aggregation>,
    pub drop_rows: Vec<String>,
    pub class_column: String,
    pub file_prefix: String,
    pub nan_representation: String,
    pub duplicates_identifier: Vec<String>,
    pub duplicates_keep: KeepPolicy,
    pub multiple_entries_in: Vec<String>,
    /// Key paths extracted from each run's configuration file.
    pub config_keys: Vec<KeyPath>,
    /// Also write per-model meta files during session runs.
    pub write_model_reports: bool,
    pub workers: usize,
}

impl ReporterConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&text, path)
    }

    /// Parse configuration text; `path` decides the format and labels errors.
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let value = metadata::parse_document(text, path).map_err(|detail| ConfigError::Parse {
            path: path.to_path_buf(),
            detail,
        })?;
        let raw: RawConfig = serde_json::from_value(value).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let patterns = raw.pattern;
        let pattern = |name: &str| -> Result<Option<NamePattern>, ConfigError> {
            patterns
                .get(name)
                .map(|p| {
                    NamePattern::new(p).map_err(|e| ConfigError::InvalidValue {
                        key: format!("pattern.{name}"),
                        detail: e.to_string(),
                    })
                })
                .transpose()
        };
        let required_pattern = |name: &str| -> Result<NamePattern, ConfigError> {
            pattern(name)?.ok_or_else(|| missing(&format!("pattern.{name}")))
        };

        let run_pattern = required_pattern("run_directory")?;

        let look_for_names = raw.look_for.ok_or_else(|| missing("look_for"))?;
        if look_for_names.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "look_for".to_string(),
                detail: "at least one pattern name is required".to_string(),
            });
        }
        let look_for = look_for_names
            .iter()
            .map(|name| required_pattern(name))
            .collect::<Result<Vec<_>, _>>()?;

        let model_metrics = resolve_metrics(
            "metrics.model",
            raw.metrics.model.ok_or_else(|| missing("metrics.model"))?,
        )?;
        let session_metrics = resolve_metrics(
            "metrics.session",
            raw.metrics.session.ok_or_else(|| missing("metrics.session"))?,
        )?;
        for metric in &session_metrics {
            if !model_metrics.contains(metric) {
                tracing::warn!(%metric, "session metric is not computed at model level, it will produce no fields");
            }
        }

        let class_column = raw
            .class_column_name
            .ok_or_else(|| missing("class_column_name"))?;
        let file_prefix = raw.file_prefix.ok_or_else(|| missing("file_prefix"))?;

        let partitions = match raw.partitions {
            Some(names) => names
                .iter()
                .map(|name| -> Result<Partition, ConfigError> {
                    Ok(Partition {
                        name: name.clone(),
                        pattern: required_pattern(&format!("{name}_set"))?,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => {
                let mut partitions = Vec::new();
                for name in DEFAULT_PARTITIONS {
                    if let Some(pattern) = pattern(&format!("{name}_set"))? {
                        partitions.push(Partition {
                            name: name.to_string(),
                            pattern,
                        });
                    }
                }
                partitions
            }
        };

        let model_directory = pattern("model_directory")?;
        let model_config = pattern("model_config")?;
        let config_keys = match &raw.config_data {
            Some(tree) => metadata::flatten(&ConfigNode::from(tree)),
            None => Vec::new(),
        };
        if !config_keys.is_empty() {
            if model_directory.is_none() {
                return Err(missing("pattern.model_directory"));
            }
            if model_config.is_none() {
                return Err(missing("pattern.model_config"));
            }
        }

        let workers = raw.workers.unwrap_or(1);
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "workers".to_string(),
                detail: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            run_pattern,
            look_for,
            model_directory,
            model_config,
            partitions,
            model_metrics,
            session_metrics,
            drop_rows: raw.drop,
            class_column,
            file_prefix,
            nan_representation: raw.nan_representation,
            duplicates_identifier: raw
                .duplicates_identifier
                .unwrap_or_else(|| vec![MODEL_COLUMN.to_string()]),
            duplicates_keep: raw.duplicates_keep,
            multiple_entries_in: raw.multiple_entries_in,
            config_keys,
            write_model_reports: raw.write_model_reports,
            workers,
        })
    }

    /// Partition of a metric file, by its logical name.
    pub fn partition_of(&self, logical_name: &str) -> Option<&str> {
        self.partitions
            .iter()
            .find(|p| p.pattern.matches(logical_name))
            .map(|p| p.name.as_str())
    }
}

impl std::fmt::Display for ReporterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |metrics: &[Aggregation]| {
            metrics.iter().map(|m| m.name()).collect::<Vec<_>>().join(", ")
        };
        writeln!(f, "run directory:   {}", self.run_pattern.as_str())?;
        writeln!(
            f,
            "look for:        {}",
            self.look_for
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(" | ")
        )?;
        writeln!(f, "model metrics:   {}", names(&self.model_metrics))?;
        writeln!(f, "session metrics: {}", names(&self.session_metrics))?;
        writeln!(
            f,
            "partitions:      {}",
            self.partitions
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )?;
        writeln!(f, "drop:            {:?}", self.drop_rows)?;
        writeln!(f, "class column:    {}", self.class_column)?;
        writeln!(f, "file prefix:     {}", self.file_prefix)?;
        writeln!(
            f,
            "duplicates:      {:?} (keep {})",
            self.duplicates_identifier, self.duplicates_keep
        )?;
        writeln!(f, "config keys:     {}", self.config_keys.len())?;
        write!(f, "workers:         {}", self.workers)
    }
}

fn missing(key: &str) -> ConfigError {
    ConfigError::MissingKey {
        key: key.to_string(),
    }
}

fn resolve_metrics(key: &str, names: Vec<String>) -> Result<Vec<Aggregation>, ConfigError> {
    names
        .iter()
        .map(|name| {
            Aggregation::from_name(name).ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                detail: format!("unknown aggregation '{name}'"),
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A complete JSON configuration used across the crate's tests.
    pub(crate) const SAMPLE_JSON: &str = r#"{
        "pattern": {
            "run_directory": "run\\d+",
            "model_directory": "config$",
            "model_config": ".*\\.json$",
            "metrics_file": ".*metrics\\.csv$",
            "train_set": "train",
            "val_set": "val",
            "test_set": "test"
        },
        "look_for": ["metrics_file"],
        "metrics": {"model": ["mean", "std"], "session": ["mean"]},
        "drop": ["accuracy"],
        "class_column_name": "class",
        "file_prefix": "meta",
        "nan_representation": "NaN",
        "duplicates_identifier": ["Models"],
        "multiple_entries_in": ["seed"],
        "config_data": {"optimizer": {"name": null}, "seed": null}
    }"#;

    pub(crate) fn sample() -> ReporterConfig {
        ReporterConfig::parse(SAMPLE_JSON, Path::new("config.json")).unwrap()
    }

    #[test]
    fn parse_sample_json() {
        let config = sample();
        assert!(config.run_pattern.matches("run1"));
        assert_eq!(config.look_for.len(), 1);
        assert_eq!(
            config.model_metrics,
            vec![Aggregation::Mean, Aggregation::Std]
        );
        assert_eq!(config.session_metrics, vec![Aggregation::Mean]);
        assert_eq!(config.class_column, "class");
        assert_eq!(config.drop_rows, vec!["accuracy"]);
        assert_eq!(config.duplicates_keep, KeepPolicy::First);
        assert_eq!(config.workers, 1);
        assert_eq!(
            config.config_keys,
            vec![vec!["optimizer", "name"], vec!["seed"]]
        );
        let partitions: Vec<&str> = config.partitions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(partitions, vec!["train", "val", "test"]);
    }

    #[test]
    fn parse_toml() {
        let text = r#"
            look_for = ["csv"]
            class_column_name = "Class"
            file_prefix = "meta"
            duplicates_keep = "last"
            workers = 4

            [pattern]
            run_directory = "run"
            csv = ".*\\.csv"
            test_set = "test"

            [metrics]
            model = ["mean", "median"]
            session = ["median"]
        "#;
        let config = ReporterConfig::parse(text, Path::new("meta.toml")).unwrap();
        assert_eq!(config.duplicates_keep, KeepPolicy::Last);
        assert_eq!(config.workers, 4);
        assert_eq!(config.nan_representation, "");
        assert_eq!(config.duplicates_identifier, vec![MODEL_COLUMN]);
        assert_eq!(config.partitions.len(), 1);
        assert!(config.model_directory.is_none());
        assert!(config.config_keys.is_empty());
    }

    #[test]
    fn missing_required_keys_are_named() {
        let cases = [
            (r#"{}"#, "pattern.run_directory"),
            (r#"{"pattern": {"run_directory": "run"}}"#, "look_for"),
            (
                r#"{"pattern": {"run_directory": "run"}, "look_for": ["csv"]}"#,
                "pattern.csv",
            ),
            (
                r#"{"pattern": {"run_directory": "run", "csv": "x"}, "look_for": ["csv"]}"#,
                "metrics.model",
            ),
        ];
        for (text, key) in cases {
            let err = ReporterConfig::parse(text, Path::new("c.json")).unwrap_err();
            match err {
                ConfigError::MissingKey { key: k } => assert_eq!(k, key),
                other => panic!("expected missing key {key}, got {other}"),
            }
        }
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let text = SAMPLE_JSON.replace(r#""session": ["mean"]"#, r#""session": ["mode"]"#);
        let err = ReporterConfig::parse(&text, Path::new("c.json")).unwrap_err();
        assert!(err.to_string().contains("unknown aggregation 'mode'"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let text = SAMPLE_JSON.replace(r#""train_set": "train""#, r#""train_set": "(train""#);
        let err = ReporterConfig::parse(&text, Path::new("c.json")).unwrap_err();
        assert!(err.to_string().contains("pattern.train_set"));
    }

    #[test]
    fn explicit_partitions_need_patterns() {
        let text = SAMPLE_JSON.replace(
            r#""look_for": ["metrics_file"],"#,
            r#""look_for": ["metrics_file"], "partitions": ["holdout"],"#,
        );
        let err = ReporterConfig::parse(&text, Path::new("c.json")).unwrap_err();
        assert!(err.to_string().contains("pattern.holdout_set"));
    }

    #[test]
    fn partition_of_uses_first_match() {
        let config = sample();
        assert_eq!(config.partition_of("train_metrics.csv"), Some("train"));
        assert_eq!(config.partition_of("test_metrics.csv"), Some("test"));
        assert_eq!(config.partition_of("summary.csv"), None);
    }

    #[test]
    fn zero_workers_rejected() {
        let text = SAMPLE_JSON.replace(r#""drop""#, r#""workers": 0, "drop""#);
        assert!(ReporterConfig::parse(&text, Path::new("c.json")).is_err());
    }

    #[test]
    fn load_missing_file() {
        let err = ReporterConfig::load(Path::new("/nonexistent/meta.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn display_lists_settings() {
        let shown = sample().to_string();
        assert!(shown.contains("model metrics:   mean, std"));
        assert!(shown.contains("file prefix:     meta"));
    }
}
