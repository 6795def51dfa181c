//! Session assembly: one summary row per model, appended to the session report.
//!
//! For every model directory the assembler aggregates the model's metric
//! files, counts its runs, merges the metadata of its run configurations, and
//! projects the session-level metric columns of each partition into one flat
//! row. The row is persisted before the next model starts, so an aborted run
//! leaves every previously finished model in the report.

use crate::aggregate::{self, AggregatedTable};
use crate::config::{ReporterConfig, MODEL_COLUMN, RUNS_COLUMN};
use crate::dataset::{self, RUN_COLUMN};
use crate::error::ReportError;
use crate::metadata;
use crate::render::{CsvRenderer, TableRenderer};
use crate::report::SessionReport;
use crate::scan;
use crate::table::{Record, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Aggregate every metric file of one model with the model-level metrics.
///
/// Rows are tagged with their run while concatenating; the `Run` column is
/// excluded again before aggregation. Keys are logical file names.
pub fn aggregate_model(
    model_path: &Path,
    config: &ReporterConfig,
) -> Result<BTreeMap<String, AggregatedTable>, ReportError> {
    let files = scan::discover_metric_files(model_path, &config.look_for, &config.run_pattern);
    let by_run = scan::group_by_run(&files);
    let datasets = dataset::build_with_run(&by_run, &config.class_column, &config.drop_rows)?;

    let exclude = [RUN_COLUMN.to_string()];
    Ok(datasets
        .iter()
        .map(|(name, ds)| {
            let table =
                aggregate::aggregate(ds, &config.class_column, &config.model_metrics, &exclude);
            (name.clone(), table)
        })
        .collect())
}

/// Merged configuration metadata of a model's runs. Empty when no config
/// keys are configured.
pub fn model_metadata(model_path: &Path, config: &ReporterConfig) -> Result<Record, ReportError> {
    let (Some(directory), Some(file)) = (&config.model_directory, &config.model_config) else {
        return Ok(Record::new());
    };
    if config.config_keys.is_empty() {
        return Ok(Record::new());
    }
    let config_files = scan::find_model_configs(model_path, directory, file);
    tracing::debug!(files = config_files.len(), "found run config files");
    metadata::collect_model_metadata(
        &config_files,
        &config.config_keys,
        &config.multiple_entries_in,
    )
}

/// Session fields `{stem}_{partition}_{metric}_{class}` for every column
/// whose suffix is a session metric. Tables whose file name matches no
/// partition contribute nothing.
pub fn session_fields(
    tables: &BTreeMap<String, AggregatedTable>,
    config: &ReporterConfig,
) -> Record {
    let mut fields = Record::new();
    for (name, table) in tables {
        let Some(partition) = config.partition_of(name) else {
            tracing::debug!(file = %name, "no partition matches, skipping for session row");
            continue;
        };
        for (c, column) in table.columns.iter().enumerate() {
            let Some((stem, metric)) = column.rsplit_once('_') else {
                continue;
            };
            if !config.session_metrics.iter().any(|m| m.name() == metric) {
                continue;
            }
            for (r, class) in table.labels.iter().enumerate() {
                fields.set(
                    format!("{stem}_{partition}_{metric}_{class}"),
                    Value::Number(table.values[r][c]),
                );
            }
        }
    }
    fields
}

/// Build the summary row of one model.
///
/// When `renderer` is given, each aggregated table is also rendered as a
/// side artifact.
pub fn summarize_model(
    model_path: &Path,
    config: &ReporterConfig,
    renderer: Option<&dyn TableRenderer>,
) -> Result<Record, ReportError> {
    let name = model_name(model_path);
    let span = tracing::info_span!("model", name = %name);
    let _enter = span.enter();

    let tables = aggregate_model(model_path, config)?;
    if let Some(renderer) = renderer {
        for (logical_name, table) in &tables {
            renderer.render(logical_name, table)?;
        }
    }

    let runs = scan::count_runs(model_path, &config.run_pattern);
    let metadata = model_metadata(model_path, config)?;
    let metrics = session_fields(&tables, config);
    tracing::info!(runs, files = tables.len(), fields = metrics.len(), "model aggregated");

    let mut row = Record::new();
    row.set(MODEL_COLUMN, Value::Text(name));
    row.set(RUNS_COLUMN, Value::Integer(runs as i64));
    row.extend(metadata);
    row.extend(metrics);
    Ok(row)
}

/// Path of the session report: `{file_prefix}_{session_basename}.csv` in `result_root`.
pub fn session_report_path(
    session_root: &Path,
    result_root: &Path,
    config: &ReporterConfig,
) -> PathBuf {
    let base = session_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .or_else(|| {
            std::fs::canonicalize(session_root)
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        })
        .unwrap_or_else(|| "session".to_string());
    result_root.join(format!("{}_{}.csv", config.file_prefix, base))
}

fn open_report(
    session_root: &Path,
    result_root: &Path,
    config: &ReporterConfig,
) -> Result<SessionReport, ReportError> {
    std::fs::create_dir_all(result_root).map_err(|e| ReportError::io(result_root, e))?;
    Ok(SessionReport::new(
        session_report_path(session_root, result_root, config),
        config.nan_representation.clone(),
        config.duplicates_identifier.clone(),
        config.duplicates_keep,
    ))
}

fn model_renderer(model_path: &Path, config: &ReporterConfig) -> Option<CsvRenderer> {
    config
        .write_model_reports
        .then(|| CsvRenderer::new(model_path, &config.file_prefix, &config.nan_representation))
}

/// Process every model of the session in order, appending each model's row
/// to the session report as soon as it is computed.
///
/// Returns `Ok(true)` when every model was written. The first fatal error
/// aborts the run; rows appended before it stay in the report.
pub fn run(
    session_root: &Path,
    result_root: &Path,
    config: &ReporterConfig,
) -> Result<bool, ReportError> {
    let report = open_report(session_root, result_root, config)?;
    let models = scan::list_model_dirs(session_root);
    tracing::info!(
        session = %session_root.display(),
        models = models.len(),
        report = %report.path().display(),
        "generating session report"
    );

    for model_path in &models {
        let renderer = model_renderer(model_path, config);
        let row = summarize_model(
            model_path,
            config,
            renderer.as_ref().map(|r| r as &dyn TableRenderer),
        )?;
        report.append(&row)?;
    }
    Ok(true)
}

/// Like [`run`], but models are processed on up to `config.workers` blocking
/// tasks at once. Appends to the report are serialized by the report itself.
///
/// The first failing model cancels the run: no further model is started and
/// tasks still in flight skip their append. Rows appended before the failure
/// stay in the report.
pub async fn run_concurrent(
    session_root: PathBuf,
    result_root: PathBuf,
    config: Arc<ReporterConfig>,
) -> Result<bool, ReportError> {
    let report = Arc::new(open_report(&session_root, &result_root, &config)?);
    let models = scan::list_model_dirs(&session_root);
    tracing::info!(
        session = %session_root.display(),
        models = models.len(),
        workers = config.workers,
        "generating session report concurrently"
    );

    let permits = Arc::new(Semaphore::new(config.workers));
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut failure: Option<ReportError> = None;
    let mut tasks = JoinSet::new();

    for model_path in models {
        while let Some(joined) = tasks.try_join_next() {
            settle(joined, &session_root, &cancelled, &mut failure);
        }
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                settle(Ok((model_path.clone(), Err(ReportError::Worker {
                    model: model_path,
                    detail: e.to_string(),
                }))), &session_root, &cancelled, &mut failure);
                break;
            }
        };
        // A permit frees up only after a task finishes, which may have failed.
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        let config = config.clone();
        let report = report.clone();
        let cancelled = cancelled.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            let outcome = process_model(&model_path, &config, &report, &cancelled);
            if outcome.is_err() {
                cancelled.store(true, Ordering::SeqCst);
            }
            (model_path, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        settle(joined, &session_root, &cancelled, &mut failure);
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(true),
    }
}

/// Summarize and append one model unless the run was cancelled. Returns
/// whether a row was appended.
fn process_model(
    model_path: &Path,
    config: &ReporterConfig,
    report: &SessionReport,
    cancelled: &AtomicBool,
) -> Result<bool, ReportError> {
    if cancelled.load(Ordering::SeqCst) {
        return Ok(false);
    }
    let renderer = model_renderer(model_path, config);
    let row = summarize_model(
        model_path,
        config,
        renderer.as_ref().map(|r| r as &dyn TableRenderer),
    )?;
    if cancelled.load(Ordering::SeqCst) {
        tracing::debug!(model = %model_path.display(), "run cancelled, row not appended");
        return Ok(false);
    }
    report.append(&row)?;
    Ok(true)
}

/// Record the outcome of a finished task, keeping the first failure.
fn settle(
    joined: Result<(PathBuf, Result<bool, ReportError>), tokio::task::JoinError>,
    session_root: &Path,
    cancelled: &AtomicBool,
    failure: &mut Option<ReportError>,
) {
    let err = match joined {
        Ok((_, Ok(_))) => return,
        Ok((model_path, Err(e))) => {
            tracing::error!(model = %model_path.display(), error = %e, "model failed");
            e
        }
        Err(e) => ReportError::Worker {
            model: session_root.to_path_buf(),
            detail: e.to_string(),
        },
    };
    cancelled.store(true, Ordering::SeqCst);
    if failure.is_none() {
        *failure = Some(err);
    }
}

/// Model-level report: aggregate one model and write its meta files into
/// `result_path`.
pub fn generate_per_model(
    model_path: &Path,
    result_path: &Path,
    config: &ReporterConfig,
) -> Result<bool, ReportError> {
    std::fs::create_dir_all(result_path).map_err(|e| ReportError::io(result_path, e))?;

    let files = scan::discover_metric_files(model_path, &config.look_for, &config.run_pattern);
    let paths: Vec<PathBuf> = files.into_iter().map(|f| f.path).collect();
    let by_name = scan::group_by_logical_name(&paths);
    let datasets = dataset::build(&by_name, &config.class_column, &config.drop_rows)?;

    let renderer = CsvRenderer::new(result_path, &config.file_prefix, &config.nan_representation);
    for (name, ds) in &datasets {
        let table = aggregate::aggregate(ds, &config.class_column, &config.model_metrics, &[]);
        let written = renderer.render(name, &table)?;
        tracing::info!(file = %written.display(), classes = table.labels.len(), "model meta file written");
    }
    Ok(true)
}

fn model_name(model_path: &Path) -> String {
    model_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| model_path.display().to_string())
}
