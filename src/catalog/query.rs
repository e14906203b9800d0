use crate::catalog::column::{Column, RawColumn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// An auxiliary SQL that gates execution of the main query. The first column
/// of the first row is evaluated as a boolean; `true` lets the main query
/// proceed. Results are cached per collector for `ttl` seconds (0 disables
/// caching).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredicateQuery {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "query")]
    pub sql: String,
    /// Cache TTL in seconds. 0 means the predicate runs on every scrape.
    #[serde(default)]
    pub ttl: f64,
}

/// One catalog entry, keyed by its YAML branch name.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// The YAML map key this query was defined under.
    pub branch: String,
    /// Metric name prefix, defaults to the branch.
    pub name: String,
    pub desc: String,
    pub sql: String,
    pub tags: Vec<String>,
    /// Scheduling priority, lower runs earlier. 0 is replaced with
    /// `100 + config-file-rank` during directory load.
    pub priority: i32,
    /// Inclusive `server_version_num` lower bound, 0 means unbounded.
    pub min_version: i64,
    /// Exclusive `server_version_num` upper bound, 0 means unbounded.
    pub max_version: i64,
    /// Per-execution timeout in seconds. 0 is finalized to 0.1, negative
    /// values disable the deadline.
    pub timeout: f64,
    /// Result cache TTL in seconds.
    pub ttl: f64,
    /// Disables the query entirely.
    pub skip: bool,
    /// Source config file, for diagnostics.
    pub path: String,
    pub predicate_queries: Vec<PredicateQuery>,
    /// All columns in declaration order.
    pub columns: Vec<Column>,
    pub column_names: Vec<String>,
    /// Column names (before rename) of LABEL columns, in order.
    pub label_names: Vec<String>,
    /// Column names (before rename) of GAUGE/COUNTER columns, in order.
    pub metric_names: Vec<String>,
}

impl Query {
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Output label names (after rename), in declaration order.
    #[must_use]
    pub fn label_list(&self) -> Vec<String> {
        self.label_names
            .iter()
            .filter_map(|n| self.column(n))
            .map(|c| c.label_name().to_string())
            .collect()
    }

    /// Fully qualified metric name for one of this query's metric columns.
    #[must_use]
    pub fn metric_fq_name(&self, column: &Column) -> String {
        format!("{}_{}", self.name, column.label_name())
    }

    /// Fully qualified metric names, in declaration order.
    #[must_use]
    pub fn metric_list(&self) -> Vec<String> {
        self.metric_names
            .iter()
            .filter_map(|n| self.column(n))
            .map(|c| self.metric_fq_name(c))
            .collect()
    }

    /// Execution deadline, `None` when disabled.
    #[must_use]
    pub fn timeout_duration(&self) -> Option<Duration> {
        if self.timeout > 0.0 {
            Some(Duration::from_secs_f64(self.timeout))
        } else {
            None
        }
    }

    /// Plain-text description of this query, used by `--dry-run` and `/stat`.
    #[must_use]
    pub fn explain(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "#┃ {} [{}] {}\n",
            self.name,
            self.branch,
            if self.path.is_empty() { "<unknown>" } else { &self.path }
        ));
        out.push_str("#┃ SYNOPSIS\n");
        out.push_str(&format!("#┃   {}\n", if self.desc.is_empty() { "N/A" } else { &self.desc }));
        out.push_str(&format!(
            "#┃   priority={} ttl={}s timeout={}s min_version={} max_version={}\n",
            self.priority, self.ttl, self.timeout, self.min_version, self.max_version
        ));
        if !self.tags.is_empty() {
            out.push_str(&format!("#┃   tags: {}\n", self.tags.join(", ")));
        }
        if !self.predicate_queries.is_empty() {
            out.push_str(&format!("#┃   predicates: {}\n", self.predicate_queries.len()));
        }
        if !self.label_names.is_empty() {
            out.push_str(&format!("#┃   labels: {}\n", self.label_list().join(", ")));
        }
        out.push_str("#┃ METRICS\n");
        for name in &self.metric_names {
            if let Some(col) = self.column(name) {
                out.push_str(&format!(
                    "#┃   {} ({}) {}\n",
                    self.metric_fq_name(col),
                    col.usage.as_str(),
                    col.desc
                ));
            }
        }
        out.push_str("#┃ SQL\n");
        for line in self.sql.lines() {
            out.push_str(&format!("#┃   {line}\n"));
        }
        out
    }

    /// HTML fragment describing this query, used by `/explain`.
    #[must_use]
    pub fn html(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("<h2>{}</h2>\n", html_escape(&self.name)));
        out.push_str(&format!(
            "<p>branch <code>{}</code> from <code>{}</code>: {}</p>\n",
            html_escape(&self.branch),
            html_escape(&self.path),
            html_escape(&self.desc)
        ));
        out.push_str("<table border=\"1\"><tr><th>column</th><th>usage</th><th>rename</th><th>description</th></tr>\n");
        for col in &self.columns {
            out.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                html_escape(&col.name),
                col.usage.as_str(),
                html_escape(col.rename.as_deref().unwrap_or("")),
                html_escape(&col.desc)
            ));
        }
        out.push_str("</table>\n");
        out.push_str(&format!("<pre>{}</pre>\n", html_escape(&self.sql)));
        out
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Raw YAML shape of a catalog entry. The `metrics` list preserves column
/// order as a sequence of single-entry maps.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawQuery {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "description")]
    pub desc: Option<String>,
    #[serde(default, alias = "query")]
    pub sql: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub min_version: Option<i64>,
    #[serde(default)]
    pub max_version: Option<i64>,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub ttl: Option<f64>,
    #[serde(default)]
    pub skip: Option<bool>,
    #[serde(default)]
    pub predicate_queries: Option<Vec<PredicateQuery>>,
    #[serde(default)]
    pub metrics: Option<Vec<BTreeMap<String, Option<RawColumn>>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::column::ColumnUsage;

    fn sample_query() -> Query {
        Query {
            branch: "sample_branch".into(),
            name: "sample".into(),
            desc: "sample query".into(),
            sql: "SELECT 'db' AS datname, 1 AS value".into(),
            tags: vec!["tag1".into(), "tag2".into()],
            timeout: 1.5,
            columns: vec![
                Column {
                    name: "datname".into(),
                    rename: Some("db".into()),
                    usage: ColumnUsage::Label,
                    desc: "database name".into(),
                    scale: None,
                    default: None,
                },
                Column {
                    name: "value".into(),
                    rename: Some("val".into()),
                    usage: ColumnUsage::Gauge,
                    desc: "metric value".into(),
                    scale: None,
                    default: None,
                },
            ],
            column_names: vec!["datname".into(), "value".into()],
            label_names: vec!["datname".into()],
            metric_names: vec!["value".into()],
            ..Query::default()
        }
    }

    #[test]
    fn test_has_tag() {
        let q = sample_query();
        assert!(q.has_tag("tag1"));
        assert!(!q.has_tag("missing"));
    }

    #[test]
    fn test_label_list_honors_rename() {
        assert_eq!(sample_query().label_list(), vec!["db".to_string()]);
    }

    #[test]
    fn test_metric_list_honors_rename() {
        assert_eq!(sample_query().metric_list(), vec!["sample_val".to_string()]);
    }

    #[test]
    fn test_timeout_duration() {
        assert_eq!(sample_query().timeout_duration(), Some(Duration::from_millis(1500)));

        let mut q = sample_query();
        q.timeout = 0.0;
        assert_eq!(q.timeout_duration(), None);
    }

    #[test]
    fn test_explain_contains_synopsis() {
        let text = sample_query().explain();
        assert!(text.contains("SYNOPSIS"));
        assert!(text.contains("sample_val"));
        assert!(text.contains("SELECT"));
    }

    #[test]
    fn test_html_rendering() {
        let html = sample_query().html();
        assert!(html.contains("<h2>sample</h2>"));
        assert!(html.contains("datname"));
    }
}
