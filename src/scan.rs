//! Discovery of metric and configuration files in a session tree.
//!
//! A session root holds one directory per model; each model holds run
//! directories (matched by name pattern) that contain the metric files.
//! Everything here is read-only and treats a missing root as "nothing found".

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A file-name pattern anchored at the start of the name.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{pattern})"))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as configured, without the anchor.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// A metric file that lies inside a run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricFile {
    pub path: PathBuf,
    /// Final path component, shared by the same file across runs.
    pub logical_name: String,
    /// Name of the owning run directory.
    pub run: String,
}

/// Recursively collect files under `root` whose name matches any pattern.
///
/// Directory entries are visited in sorted order. A missing root yields an
/// empty list.
pub fn find_files(root: &Path, patterns: &[NamePattern]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if !root.exists() {
        tracing::debug!(root = %root.display(), "scan root does not exist");
        return files;
    }
    collect_recursive(root, patterns, &mut files);
    files
}

fn collect_recursive(dir: &Path, patterns: &[NamePattern], files: &mut Vec<PathBuf>) {
    let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(e) => e.flatten().map(|entry| entry.path()).collect(),
        Err(e) => {
            tracing::warn!(error = %e, dir = %dir.display(), "failed to read directory");
            return;
        }
    };
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_recursive(&path, patterns, files);
        } else if let Some(name) = file_name(&path) {
            if patterns.iter().any(|p| p.matches(&name)) {
                files.push(path);
            }
        }
    }
}

/// Walk up from `path` and return the name of the first ancestor directory
/// matching `run_pattern`.
///
/// Returns `None` once `stop_path` (or the filesystem root) is reached
/// without a match.
pub fn resolve_run(path: &Path, run_pattern: &NamePattern, stop_path: &Path) -> Option<String> {
    let mut parent = path.parent()?;
    loop {
        if let Some(name) = file_name(parent) {
            if run_pattern.matches(&name) {
                return Some(name);
            }
        }
        if parent == stop_path {
            return None;
        }
        parent = parent.parent()?;
    }
}

/// Find metric files under `root` and keep those that belong to a run.
pub fn discover_metric_files(
    root: &Path,
    look_for: &[NamePattern],
    run_pattern: &NamePattern,
) -> Vec<MetricFile> {
    find_files(root, look_for)
        .into_iter()
        .filter_map(|path| {
            let Some(run) = resolve_run(&path, run_pattern, root) else {
                tracing::debug!(file = %path.display(), "file is not inside a run directory, skipping");
                return None;
            };
            let logical_name = file_name(&path)?;
            Some(MetricFile {
                path,
                logical_name,
                run,
            })
        })
        .collect()
}

/// Group files by their final path component, preserving discovery order
/// within each group.
pub fn group_by_logical_name(files: &[PathBuf]) -> BTreeMap<String, Vec<PathBuf>> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        if let Some(name) = file_name(file) {
            groups.entry(name).or_default().push(file.clone());
        }
    }
    groups
}

/// Group metric files by logical name, keeping each file's run.
pub fn group_by_run(files: &[MetricFile]) -> BTreeMap<String, Vec<(String, PathBuf)>> {
    let mut groups: BTreeMap<String, Vec<(String, PathBuf)>> = BTreeMap::new();
    for file in files {
        groups
            .entry(file.logical_name.clone())
            .or_default()
            .push((file.run.clone(), file.path.clone()));
    }
    groups
}

/// Immediate subdirectories of the session root, sorted. Each one is a model.
pub fn list_model_dirs(session_root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = match std::fs::read_dir(session_root) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, root = %session_root.display(), "failed to list model directories");
            Vec::new()
        }
    };
    dirs.sort();
    dirs
}

/// Number of immediate subdirectories of `model_path` whose name matches `run_pattern`.
pub fn count_runs(model_path: &Path, run_pattern: &NamePattern) -> usize {
    let entries = match std::fs::read_dir(model_path) {
        Ok(e) => e,
        Err(_) => return 0,
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| file_name(p).is_some_and(|name| run_pattern.matches(&name)))
        .count()
}

/// Configuration files of a model: files matching `config_pattern` whose
/// direct parent directory matches `directory_pattern`.
pub fn find_model_configs(
    model_path: &Path,
    directory_pattern: &NamePattern,
    config_pattern: &NamePattern,
) -> Vec<PathBuf> {
    find_files(model_path, std::slice::from_ref(config_pattern))
        .into_iter()
        .filter(|path| {
            path.parent()
                .and_then(file_name)
                .is_some_and(|dir| directory_pattern.matches(&dir))
        })
        .collect()
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}
