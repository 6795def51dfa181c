//! Error types shared by the report pipeline.
//!
//! Only fatal conditions are errors. A missing scan root and a metric file
//! that belongs to no partition are both treated as empty results by the
//! components that encounter them.

use std::path::PathBuf;

/// Errors raised while loading or validating the reporter configuration.
///
/// All of these surface before any metric file is touched.
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The configuration file is not valid JSON/TOML.
    Parse { path: PathBuf, detail: String },
    /// A required key is absent.
    MissingKey { key: String },
    /// A key is present but its value is unusable (bad regex, unknown metric, ...).
    InvalidValue { key: String, detail: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, detail } => {
                write!(f, "failed to parse config {}: {}", path.display(), detail)
            }
            ConfigError::MissingKey { key } => {
                write!(f, "missing required config key '{key}'")
            }
            ConfigError::InvalidValue { key, detail } => {
                write!(f, "invalid value for config key '{key}': {detail}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Fatal errors of a report run.
#[derive(Debug)]
pub enum ReportError {
    /// Configuration could not be loaded or validated.
    Config(ConfigError),
    /// Filesystem access failed.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A metric, config or report file could not be read as expected.
    Malformed { path: PathBuf, detail: String },
    /// CSV reading or writing failed.
    Csv { path: PathBuf, source: csv::Error },
    /// A model worker task panicked or was cancelled.
    Worker { model: PathBuf, detail: String },
}

impl ReportError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReportError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        ReportError::Malformed {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        ReportError::Csv {
            path: path.into(),
            source,
        }
    }
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Config(e) => write!(f, "{e}"),
            ReportError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            ReportError::Malformed { path, detail } => {
                write!(f, "malformed file {}: {}", path.display(), detail)
            }
            ReportError::Csv { path, source } => {
                write!(f, "CSV error in {}: {}", path.display(), source)
            }
            ReportError::Worker { model, detail } => {
                write!(f, "worker for model {} failed: {}", model.display(), detail)
            }
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Config(e) => Some(e),
            ReportError::Io { source, .. } => Some(source),
            ReportError::Csv { source, .. } => Some(source),
            ReportError::Malformed { .. } | ReportError::Worker { .. } => None,
        }
    }
}

impl From<ConfigError> for ReportError {
    fn from(e: ConfigError) -> Self {
        ReportError::Config(e)
    }
}
