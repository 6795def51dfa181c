//! Aggregates per-class metrics of repeated training runs into per-model meta
//! files and a per-session summary report.
//!
//! A session directory holds one directory per model; each model holds run
//! directories with metric CSV files and run configuration files. See
//! [`session::run`] for the session-level entry point and
//! [`session::generate_per_model`] for the model-level one.

pub mod aggregate;
pub mod config;
pub mod dataset;
pub mod error;
pub mod metadata;
pub mod render;
pub mod report;
pub mod scan;
pub mod session;
pub mod table;

pub use config::ReporterConfig;
pub use error::{ConfigError, ReportError};
pub use session::{generate_per_model, run, run_concurrent};
