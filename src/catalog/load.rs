use crate::catalog::column::Column;
use crate::catalog::query::{Query, RawQuery};
use crate::catalog::validate::{validate_label_name, validate_metric_name};
use anyhow::{Context, Result, anyhow, bail};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The shared, immutable query catalog. Reload swaps the outer `Arc`.
pub type Catalog = Arc<HashMap<String, Arc<Query>>>;

/// Resolve the config path: CLI argument, then `PG_EXPORTER_CONFIG`, then the
/// first existing default candidate.
#[must_use]
pub fn get_config_path(cli: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = cli
        && !path.is_empty()
    {
        tracing::info!(path, "config path from command line");
        return Some(PathBuf::from(path));
    }
    if let Ok(path) = env::var("PG_EXPORTER_CONFIG")
        && !path.is_empty()
    {
        tracing::info!(path, "config path from PG_EXPORTER_CONFIG");
        return Some(PathBuf::from(path));
    }
    for candidate in ["pg_exporter.yml", "/etc/pg_exporter.yml", "/etc/pg_exporter"] {
        if Path::new(candidate).exists() {
            tracing::info!(path = candidate, "fallback on default config path");
            return Some(PathBuf::from(candidate));
        }
    }
    None
}

/// Parse YAML content into a branch → query map, validating every entry.
///
/// # Errors
///
/// Returns an error for malformed YAML, null queries, empty SQL, negative
/// TTLs, invalid metric entries, unknown usage, bad numeric options,
/// duplicate columns / labels / metric names, or invalid Prometheus names.
/// Every error names the offending branch.
pub fn parse_config(content: &str) -> Result<HashMap<String, Query>> {
    let raw: BTreeMap<String, Option<RawQuery>> =
        serde_yaml::from_str(content).context("malformed config")?;

    let mut queries = HashMap::with_capacity(raw.len());
    for (branch, raw_query) in raw {
        let Some(raw_query) = raw_query else {
            bail!("query {branch:?} is null");
        };
        let query = build_query(&branch, raw_query)?;
        queries.insert(branch, query);
    }
    Ok(queries)
}

fn build_query(branch: &str, raw: RawQuery) -> Result<Query> {
    let sql = raw.sql.unwrap_or_default();
    if sql.trim().is_empty() {
        bail!("query {branch:?} has empty SQL");
    }
    let ttl = raw.ttl.unwrap_or(0.0);
    if ttl < 0.0 {
        bail!("query {branch:?} has negative ttl: {ttl}");
    }
    let predicate_queries = raw.predicate_queries.unwrap_or_default();
    for (i, pq) in predicate_queries.iter().enumerate() {
        if pq.sql.trim().is_empty() {
            bail!("query {branch:?} has empty predicate_queries[{i}].sql");
        }
        if pq.ttl < 0.0 {
            bail!("query {branch:?} has negative predicate_queries[{i}].ttl: {}", pq.ttl);
        }
    }

    let metrics = raw.metrics.unwrap_or_default();
    if metrics.is_empty() {
        bail!("query {branch:?} has no metrics definition");
    }

    let mut columns: Vec<Column> = Vec::with_capacity(metrics.len());
    let mut column_names = Vec::with_capacity(metrics.len());
    let mut label_names = Vec::new();
    let mut metric_names = Vec::new();
    for entry in metrics {
        if entry.is_empty() {
            bail!("query {branch:?} has an empty metrics entry");
        }
        if entry.len() != 1 {
            bail!(
                "query {branch:?} has invalid metrics entry with {} columns, expect exactly 1",
                entry.len()
            );
        }
        for (col_name, raw_column) in entry {
            let Some(raw_column) = raw_column else {
                bail!("query {branch:?} has null column definition for {col_name:?}");
            };
            let column = raw_column
                .into_column(&col_name)
                .with_context(|| format!("query {branch:?} column {col_name:?}"))?;
            if columns.iter().any(|c| c.name == column.name) {
                bail!("query {branch:?} has duplicate column name {:?}", column.name);
            }
            if column.usage.is_label() {
                label_names.push(column.name.clone());
            } else if column.usage.is_metric() {
                metric_names.push(column.name.clone());
            }
            column_names.push(column.name.clone());
            columns.push(column);
        }
    }
    if metric_names.is_empty() {
        bail!("query {branch:?} defines no GAUGE/COUNTER columns");
    }

    let query = Query {
        branch: branch.to_string(),
        name: raw.name.filter(|n| !n.is_empty()).unwrap_or_else(|| branch.to_string()),
        desc: raw.desc.unwrap_or_default(),
        sql,
        tags: raw.tags.unwrap_or_default(),
        priority: raw.priority.unwrap_or(0),
        min_version: raw.min_version.unwrap_or(0),
        max_version: raw.max_version.unwrap_or(0),
        timeout: raw.timeout.unwrap_or(0.0),
        ttl,
        skip: raw.skip.unwrap_or(false),
        path: String::new(),
        predicate_queries,
        columns,
        column_names,
        label_names,
        metric_names,
    };

    // Label and metric names are validated here so scrapes cannot trip over
    // names the Prometheus client would reject.
    let mut seen_labels = HashSet::new();
    for label in query.label_list() {
        validate_label_name(&label).with_context(|| format!("query {branch:?} label {label:?}"))?;
        if !seen_labels.insert(label.clone()) {
            bail!("query {branch:?} has duplicate label name {label:?}");
        }
    }
    let mut seen_metrics = HashSet::new();
    for metric in query.metric_list() {
        validate_metric_name(&metric)
            .with_context(|| format!("query {branch:?} metric {metric:?}"))?;
        if !seen_metrics.insert(metric.clone()) {
            bail!("query {branch:?} has duplicate metric name {metric:?}");
        }
    }

    Ok(query)
}

/// Attach the source tag and apply timeout defaults: 0 becomes 100 ms,
/// negative disables the deadline.
pub fn finalize_queries(queries: &mut HashMap<String, Query>, source: &str) {
    for query in queries.values_mut() {
        query.path = source.to_string();
        if query.timeout == 0.0 {
            query.timeout = 0.1;
        }
        if query.timeout < 0.0 {
            query.timeout = 0.0;
        }
    }
}

/// Parse a YAML string holding exactly one query definition.
///
/// # Errors
///
/// Returns an error when zero or more than one branch is defined, or when
/// the definition fails validation.
pub fn parse_query(content: &str) -> Result<Query> {
    let mut queries = parse_config(content)?;
    if queries.is_empty() {
        bail!("no query definition found");
    }
    if queries.len() > 1 {
        bail!("multiple query definitions found");
    }
    finalize_queries(&mut queries, "<inline>");
    queries
        .into_values()
        .next()
        .ok_or_else(|| anyhow!("no query definition found"))
}

/// Load a single config file, or every `.yaml`/`.yml` file of a directory in
/// lexicographic order. In directory mode a later file's branch overwrites an
/// earlier one's, queries with priority 0 receive `100 + file-rank`, and
/// files that fail to parse are skipped with a warning; loading fails only
/// when YAML files exist but no query survived.
///
/// # Errors
///
/// Returns an error when the path does not exist, a single file fails to
/// parse, or a directory with YAML files yields no queries.
pub fn load_config(config_path: &Path) -> Result<HashMap<String, Arc<Query>>> {
    let stat = std::fs::metadata(config_path)
        .with_context(|| format!("invalid config path: {}", config_path.display()))?;

    if stat.is_dir() {
        let mut conf_files: Vec<PathBuf> = std::fs::read_dir(config_path)
            .with_context(|| format!("fail reading config dir: {}", config_path.display()))?
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml" | "yml")
                )
            })
            .collect();
        conf_files.sort();

        let mut queries: HashMap<String, Arc<Query>> = HashMap::new();
        let mut first_err: Option<anyhow::Error> = None;
        let mut config_count = 0;
        for conf_path in &conf_files {
            match load_file(conf_path) {
                Err(err) => {
                    tracing::warn!(path = %conf_path.display(), error = %err, "skip config file");
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                Ok(single) => {
                    config_count += 1;
                    for (branch, mut query) in single {
                        if query.priority == 0 {
                            query.priority = 100 + config_count;
                        }
                        queries.insert(branch, Arc::new(query));
                    }
                }
            }
        }
        if !conf_files.is_empty() && queries.is_empty() {
            let base = anyhow!(
                "no queries loaded from config dir {} ({} yaml files)",
                config_path.display(),
                conf_files.len()
            );
            return Err(match first_err {
                Some(err) => err.context(base.to_string()),
                None => base,
            });
        }
        tracing::debug!(
            queries = queries.len(),
            files = config_count,
            "loaded config directory"
        );
        return Ok(queries);
    }

    let queries = load_file(config_path)?;
    tracing::debug!(queries = queries.len(), path = %config_path.display(), "loaded config file");
    Ok(queries.into_iter().map(|(k, v)| (k, Arc::new(v))).collect())
}

fn load_file(path: &Path) -> Result<HashMap<String, Query>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("fail reading config file {}", path.display()))?;
    let mut queries = parse_config(&content)?;
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    finalize_queries(&mut queries, &source);
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"
test_query:
  sql: SELECT 1 AS metric, 'db' AS datname
  metrics:
    - metric:
        usage: gauge
        description: metric value
    - datname:
        usage: label
        description: database name
"#;

    #[test]
    fn test_parse_config_simple() {
        let queries = parse_config(SIMPLE).unwrap();
        let q = queries.get("test_query").unwrap();
        assert_eq!(q.name, "test_query");
        assert_eq!(q.metric_names, vec!["metric"]);
        assert_eq!(q.label_names, vec!["datname"]);
    }

    #[test]
    fn test_parse_config_accepts_query_alias() {
        let content = r#"
q:
  query: SELECT 1 AS v
  metrics:
    - v: {usage: gauge}
"#;
        let queries = parse_config(content).unwrap();
        assert_eq!(queries.get("q").unwrap().sql, "SELECT 1 AS v");
    }

    #[test]
    fn test_parse_query_single() {
        let q = parse_query(SIMPLE).unwrap();
        assert_eq!(q.branch, "test_query");
        assert_eq!(q.path, "<inline>");
        // timeout default applied by finalize
        assert!((q.timeout - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_query_rejects_zero_or_many() {
        assert!(parse_query("{}").is_err());

        let multi = r#"
q1:
  sql: SELECT 1 AS m
  metrics:
    - m: {usage: gauge}
q2:
  sql: SELECT 2 AS m
  metrics:
    - m: {usage: gauge}
"#;
        assert!(parse_query(multi).is_err());
    }

    #[test]
    fn test_finalize_timeout_rules() {
        let content = r#"
q:
  sql: SELECT 1 AS m
  timeout: -1
  metrics:
    - m: {usage: gauge}
"#;
        let q = parse_query(content).unwrap();
        assert_eq!(q.timeout, 0.0);
        assert!(q.timeout_duration().is_none());
    }

    #[test]
    fn test_explicit_priority_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("0100-a.yml"),
            "q:\n  sql: SELECT 1 AS m\n  priority: 5\n  metrics:\n    - m: {usage: gauge}\n",
        )
        .unwrap();
        let queries = load_config(dir.path()).unwrap();
        assert_eq!(queries.get("q").unwrap().priority, 5);
    }

    #[test]
    fn test_get_config_path_precedence() {
        temp_env::with_var("PG_EXPORTER_CONFIG", Some("/tmp/from-env.yml"), || {
            let path = get_config_path(Some("/tmp/from-cli.yml"));
            assert_eq!(path, Some(PathBuf::from("/tmp/from-cli.yml")));

            let path = get_config_path(None);
            assert_eq!(path, Some(PathBuf::from("/tmp/from-env.yml")));
        });
    }
}
