//! Prometheus naming rules and constant-label conflict checks, enforced at
//! load time so the scrape path never feeds the client library an invalid
//! name.

use crate::catalog::query::Query;
use anyhow::{Result, bail};
use std::collections::HashMap;
use std::sync::Arc;

/// Label prefix reserved for Prometheus internals.
pub const RESERVED_LABEL_PREFIX: &str = "__";

// The grammars are `[a-zA-Z_][a-zA-Z0-9_]*` for labels and
// `[a-zA-Z_:][a-zA-Z0-9_:]*` for metrics, checked character-wise so an
// invalid name can never panic a scrape.

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// # Errors
///
/// Returns an error when the name is empty, uses the reserved `__` prefix,
/// or does not match the Prometheus label grammar.
pub fn validate_label_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("empty label name");
    }
    if name.starts_with(RESERVED_LABEL_PREFIX) {
        bail!("label name {name:?} uses reserved prefix {RESERVED_LABEL_PREFIX:?}");
    }
    if !is_valid_label_name(name) {
        bail!("invalid label name {name:?}");
    }
    Ok(())
}

/// # Errors
///
/// Returns an error when the name is empty or does not match the Prometheus
/// metric grammar.
pub fn validate_metric_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("empty metric name");
    }
    if !is_valid_metric_name(name) {
        bail!("invalid metric name {name:?}");
    }
    Ok(())
}

/// Reject constant label keys that would collide with a query's output
/// labels (after rename), which the Prometheus client refuses at sample
/// creation time. When internal metrics are enabled the dynamic labels used
/// by the exporter's own series (`datname`, `query`) are reserved too.
///
/// Branches are checked in sorted order for deterministic error messages.
///
/// # Errors
///
/// Returns an error naming the conflicting label and branch.
pub fn validate_const_label_conflicts(
    const_labels: &HashMap<String, String>,
    queries: &HashMap<String, Arc<Query>>,
    disable_intro: bool,
) -> Result<()> {
    if const_labels.is_empty() {
        return Ok(());
    }

    if !disable_intro {
        for reserved in ["datname", "query"] {
            if const_labels.contains_key(reserved) {
                bail!("const label {reserved:?} conflicts with built-in exporter metric label {reserved:?}");
            }
        }
    }

    let mut branches: Vec<&String> = queries.keys().collect();
    branches.sort();
    for branch in branches {
        let Some(query) = queries.get(branch) else {
            continue;
        };
        for label in query.label_list() {
            if const_labels.contains_key(&label) {
                bail!(
                    "const label {label:?} conflicts with query {branch:?} (name={:?}) label {label:?}",
                    query.name
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_query;

    #[test]
    fn test_label_name_rules() {
        assert!(validate_label_name("datname").is_ok());
        assert!(validate_label_name("a_1").is_ok());
        assert!(validate_label_name("_leading").is_ok());
        assert!(validate_label_name("").is_err());
        assert!(validate_label_name("__reserved").is_err());
        assert!(validate_label_name("1bad").is_err());
        assert!(validate_label_name("bad-dash").is_err());
        assert!(validate_label_name("bad:colon").is_err());
        assert!(validate_label_name("bad name").is_err());
    }

    #[test]
    fn test_metric_name_rules() {
        assert!(validate_metric_name("pg_up").is_ok());
        assert!(validate_metric_name("ns:sub:metric").is_ok());
        assert!(validate_metric_name(":leading").is_ok());
        assert!(validate_metric_name("").is_err());
        assert!(validate_metric_name("1bad").is_err());
        assert!(validate_metric_name("bad metric").is_err());
        assert!(validate_metric_name("bad-dash").is_err());
    }

    #[test]
    fn test_const_label_conflict_with_query_label() {
        let q = parse_query(
            r#"
q:
  sql: SELECT 1 AS v, 'x' AS d
  metrics:
    - d: {usage: label, rename: db}
    - v: {usage: gauge}
"#,
        )
        .unwrap();
        let mut queries = HashMap::new();
        queries.insert("q".to_string(), Arc::new(q));

        let mut labels = HashMap::new();
        labels.insert("db".to_string(), "foo".to_string());

        let err = validate_const_label_conflicts(&labels, &queries, true).unwrap_err();
        assert!(err.to_string().contains("\"q\""), "error should name the branch: {err}");

        let mut ok_labels = HashMap::new();
        ok_labels.insert("cluster".to_string(), "foo".to_string());
        assert!(validate_const_label_conflicts(&ok_labels, &queries, true).is_ok());
    }

    #[test]
    fn test_const_label_conflict_with_internal_labels() {
        let queries = HashMap::new();
        let mut labels = HashMap::new();
        labels.insert("datname".to_string(), "x".to_string());

        assert!(validate_const_label_conflicts(&labels, &queries, false).is_err());
        // allowed when internal metrics are disabled
        assert!(validate_const_label_conflicts(&labels, &queries, true).is_ok());
    }
}
