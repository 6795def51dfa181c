//! Model configuration metadata: flattening a key-path template, pulling the
//! addressed values out of each run's configuration document, and merging
//! the per-run fields into one set per model.

use crate::error::ReportError;
use crate::table::{Record, Value};
use std::collections::HashMap;
use std::path::Path;

/// A parsed hierarchical configuration document.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNode {
    /// Keyed children in document order.
    Mapping(Vec<(String, ConfigNode)>),
    Sequence(Vec<ConfigNode>),
    Scalar(Value),
}

/// Ordered keys leading from the document root to one leaf.
pub type KeyPath = Vec<String>;

impl ConfigNode {
    /// Child under `key`. Inside a sequence, the first element that has the
    /// key is used.
    fn child(&self, key: &str) -> Option<&ConfigNode> {
        match self {
            ConfigNode::Mapping(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            ConfigNode::Sequence(items) => items.iter().find_map(|item| item.child(key)),
            ConfigNode::Scalar(_) => None,
        }
    }

    fn navigate(&self, path: &[String]) -> Option<&ConfigNode> {
        path.iter().try_fold(self, |node, key| node.child(key))
    }

    /// Collapse the node into a single value. Nested structures become text.
    fn to_value(&self) -> Value {
        match self {
            ConfigNode::Scalar(v) => v.clone(),
            ConfigNode::Sequence(items) => Value::Text(
                items
                    .iter()
                    .map(|i| i.to_value().to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            ConfigNode::Mapping(entries) => Value::Text(
                entries
                    .iter()
                    .map(|(k, v)| format!("{k}:{}", v.to_value()))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        }
    }
}

impl From<&serde_json::Value> for ConfigNode {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Object(map) => ConfigNode::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), ConfigNode::from(v)))
                    .collect(),
            ),
            Json::Array(items) => {
                ConfigNode::Sequence(items.iter().map(ConfigNode::from).collect())
            }
            Json::Null => ConfigNode::Scalar(Value::Missing),
            Json::Bool(b) => ConfigNode::Scalar(Value::Bool(*b)),
            Json::Number(n) => ConfigNode::Scalar(match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            }),
            Json::String(s) => ConfigNode::Scalar(Value::Text(s.clone())),
        }
    }
}

/// Parse a document as TOML when the extension is `.toml`, JSON otherwise.
pub fn parse_document(text: &str, path: &Path) -> Result<serde_json::Value, String> {
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(text).map_err(|e| format!("invalid TOML: {e}"))
    } else {
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))
    }
}

/// Read and parse one run's configuration file.
pub fn load_document(path: &Path) -> Result<ConfigNode, ReportError> {
    let text = std::fs::read_to_string(path).map_err(|e| ReportError::io(path, e))?;
    let value = parse_document(&text, path).map_err(|detail| ReportError::malformed(path, detail))?;
    Ok(ConfigNode::from(&value))
}

/// Every key path from the root of `tree` to one of its leaves.
///
/// Mapping keys are appended to the path; sequence elements are descended
/// into without adding a key. A tree with N leaves yields N paths.
pub fn flatten(tree: &ConfigNode) -> Vec<KeyPath> {
    let mut paths = Vec::new();
    let mut prefix = Vec::new();
    flatten_into(tree, &mut prefix, &mut paths);
    paths
}

fn flatten_into(node: &ConfigNode, prefix: &mut KeyPath, paths: &mut Vec<KeyPath>) {
    match node {
        ConfigNode::Mapping(entries) => {
            for (key, child) in entries {
                prefix.push(key.clone());
                flatten_into(child, prefix, paths);
                prefix.pop();
            }
        }
        ConfigNode::Sequence(items) => {
            for item in items {
                flatten_into(item, prefix, paths);
            }
        }
        ConfigNode::Scalar(_) => paths.push(prefix.clone()),
    }
}

/// Pull the values addressed by `key_paths` out of `doc`.
///
/// Field names are the path joined with `_`. A path that lands on a mapping
/// yields one field per entry, named `{path}_{entry}`. Paths absent from the
/// document contribute nothing.
pub fn extract(doc: &ConfigNode, key_paths: &[KeyPath]) -> Record {
    let mut fields = Record::new();
    for path in key_paths {
        let Some(node) = doc.navigate(path) else {
            tracing::debug!(path = %path.join("."), "config key not present in document");
            continue;
        };
        let name = path.join("_");
        match node {
            ConfigNode::Mapping(entries) => {
                for (key, child) in entries {
                    let field = if name.is_empty() {
                        key.clone()
                    } else {
                        format!("{name}_{key}")
                    };
                    fields.set(field, child.to_value());
                }
            }
            other => fields.set(name, other.to_value()),
        }
    }
    fields
}

/// Merge per-run fields (in run discovery order) into one record.
///
/// The first value seen for a field wins, except for fields named in
/// `multi_value_keys`: those collect every distinct rendered value and
/// store them joined with `/`. Missing values are left out of the set; a
/// field that is missing in every run stays missing.
pub fn merge(per_run_fields: &[Record], multi_value_keys: &[String]) -> Record {
    let mut merged = Record::new();
    let mut distinct: HashMap<&str, Vec<String>> = HashMap::new();

    for fields in per_run_fields {
        for (name, value) in fields.iter() {
            if multi_value_keys.iter().any(|k| k == name) {
                if value.is_missing() {
                    if !merged.contains(name) {
                        merged.set(name, Value::Missing);
                    }
                    continue;
                }
                let seen = distinct.entry(name).or_default();
                let rendered = value.to_string();
                if !seen.contains(&rendered) {
                    seen.push(rendered);
                }
                merged.set(name, Value::Text(seen.join("/")));
            } else if !merged.contains(name) {
                merged.set(name, value.clone());
            }
        }
    }
    merged
}

/// Load each config file, extract `key_paths`, and merge across runs.
pub fn collect_model_metadata(
    config_files: &[std::path::PathBuf],
    key_paths: &[KeyPath],
    multi_value_keys: &[String],
) -> Result<Record, ReportError> {
    let mut per_run = Vec::with_capacity(config_files.len());
    for path in config_files {
        let doc = load_document(path)?;
        per_run.push(extract(&doc, key_paths));
    }
    Ok(merge(&per_run, multi_value_keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn node(v: serde_json::Value) -> ConfigNode {
        ConfigNode::from(&v)
    }

    fn record(pairs: &[(&str, Value)]) -> Record {
        let mut r = Record::new();
        for (k, v) in pairs {
            r.set(*k, v.clone());
        }
        r
    }

    #[test]
    fn flatten_yields_one_path_per_leaf() {
        let tree = node(json!({
            "optimizer": {"name": null, "lr": null},
            "augment": [{"flip": null}, {"crop": {"size": null}}],
            "epochs": null
        }));
        let paths = flatten(&tree);
        assert_eq!(
            paths,
            vec![
                vec!["optimizer", "name"],
                vec!["optimizer", "lr"],
                vec!["augment", "flip"],
                vec!["augment", "crop", "size"],
                vec!["epochs"],
            ]
        );
    }

    #[test]
    fn flatten_every_branch_of_multi_child_node() {
        let tree = node(json!({"a": {"b": 1, "c": 2, "d": {"e": 3}}}));
        assert_eq!(flatten(&tree).len(), 3);
    }

    #[test]
    fn extract_leaves_and_expands_mappings() {
        let doc = node(json!({
            "optimizer": {"name": "adam", "lr": 0.001},
            "model": {"backbone": {"depth": 18, "pretrained": true}},
            "epochs": 30
        }));
        let paths = vec![
            vec!["optimizer".to_string(), "name".to_string()],
            vec!["model".to_string(), "backbone".to_string()],
            vec!["epochs".to_string()],
            vec!["missing".to_string()],
        ];
        let fields = extract(&doc, &paths);
        assert_eq!(fields.get("optimizer_name"), Some(&Value::Text("adam".to_string())));
        assert_eq!(fields.get("model_backbone_depth"), Some(&Value::Integer(18)));
        assert_eq!(fields.get("model_backbone_pretrained"), Some(&Value::Bool(true)));
        assert_eq!(fields.get("epochs"), Some(&Value::Integer(30)));
        assert!(!fields.contains("missing"));
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn extract_through_sequence() {
        let doc = node(json!({"augment": [{"flip": true}, {"crop": 224}]}));
        let paths = vec![vec!["augment".to_string(), "crop".to_string()]];
        let fields = extract(&doc, &paths);
        assert_eq!(fields.get("augment_crop"), Some(&Value::Integer(224)));
    }

    #[test]
    fn merge_first_run_wins() {
        let runs = vec![
            record(&[("lr", Value::Number(0.1))]),
            record(&[("lr", Value::Number(0.2)), ("epochs", Value::Integer(5))]),
        ];
        let merged = merge(&runs, &[]);
        assert_eq!(merged.get("lr"), Some(&Value::Number(0.1)));
        assert_eq!(merged.get("epochs"), Some(&Value::Integer(5)));
    }

    #[test]
    fn merge_multi_valued_is_a_set() {
        let a = Value::Text("a".to_string());
        let b = Value::Text("b".to_string());
        let orders = [
            vec![a.clone(), b.clone(), a.clone()],
            vec![b.clone(), a.clone(), a.clone()],
        ];
        for order in orders {
            let runs: Vec<Record> = order.iter().map(|v| record(&[("seed", v.clone())])).collect();
            let merged = merge(&runs, &["seed".to_string()]);
            let Some(Value::Text(joined)) = merged.get("seed") else {
                panic!("seed should be text");
            };
            let parts: HashSet<&str> = joined.split('/').collect();
            assert_eq!(parts, HashSet::from(["a", "b"]));
            assert_eq!(joined.split('/').count(), 2);
        }
    }

    #[test]
    fn merge_multi_valued_skips_missing() {
        let runs = vec![
            record(&[("seed", Value::Integer(1))]),
            record(&[("seed", Value::Missing)]),
            record(&[("seed", Value::Integer(2))]),
            record(&[("tag", Value::Missing)]),
        ];
        let keys = ["seed".to_string(), "tag".to_string()];
        let merged = merge(&runs, &keys);
        assert_eq!(merged.get("seed"), Some(&Value::Text("1/2".to_string())));
        assert_eq!(merged.get("tag"), Some(&Value::Missing));
    }

    #[test]
    fn collect_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.toml");
        std::fs::write(&a, r#"{"optimizer": {"name": "adam"}, "seed": 1}"#).unwrap();
        std::fs::write(&b, "seed = 2\n[optimizer]\nname = \"sgd\"\n").unwrap();

        let paths = vec![
            vec!["optimizer".to_string(), "name".to_string()],
            vec!["seed".to_string()],
        ];
        let merged = collect_model_metadata(&[a, b], &paths, &["seed".to_string()]).unwrap();
        assert_eq!(merged.get("optimizer_name"), Some(&Value::Text("adam".to_string())));
        assert_eq!(merged.get("seed"), Some(&Value::Text("1/2".to_string())));
    }

    #[test]
    fn malformed_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        std::fs::write(&a, "{not json").unwrap();
        let err = collect_model_metadata(&[a], &[], &[]).unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }
}
