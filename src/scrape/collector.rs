use crate::catalog::Query;
use crate::scrape::cast::{cast_float64, cast_string, decode_scalar, truthy};
use crate::scrape::sample::{MetricDesc, MetricSample, ValueKind};
use anyhow::{Context, Result, anyhow};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column as _, Executor, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Result of one collector execution, consumed by the owning server's
/// accounting.
#[derive(Debug)]
pub enum CollectOutcome {
    /// Cached result replayed without touching the database.
    Hit(usize),
    /// Fresh execution, with the number of samples produced.
    Collected(usize),
    /// A predicate evaluated false; nothing was emitted.
    PredicateSkip,
    /// Query, predicate or decode failure; the previous result is retained.
    Error(anyhow::Error),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PredicateCacheEntry {
    pub at: Instant,
    pub pass: bool,
}

/// The binding of one catalog query to one server: pre-built descriptors,
/// the result cache and the predicate cache. Collectors are created by the
/// server's planner and replaced wholesale on re-planning or reload.
#[derive(Debug)]
pub struct Collector {
    pub query: Arc<Query>,
    /// Query name; also the key of the server's per-query stats maps.
    pub name: String,
    pub branch: String,
    /// Effective cache TTL in seconds; 0 when the server disables caching.
    pub ttl: f64,
    descriptors: HashMap<String, Arc<MetricDesc>>,
    pub(crate) result: Vec<MetricSample>,
    pub(crate) err: Option<String>,
    pub(crate) last_scrape: Option<Instant>,
    pub(crate) predicate_cache: Vec<Option<PredicateCacheEntry>>,
}

impl Collector {
    #[must_use]
    pub fn new(query: Arc<Query>, disable_cache: bool) -> Self {
        let labels = query.label_list();
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let mut descriptors = HashMap::with_capacity(query.metric_names.len());
        for col_name in &query.metric_names {
            if let Some(column) = query.column(col_name) {
                let kind = match column.usage {
                    crate::catalog::ColumnUsage::Counter => ValueKind::Counter,
                    _ => ValueKind::Gauge,
                };
                let help = if column.desc.is_empty() {
                    format!("value of column {} from query {}", column.name, query.name)
                } else {
                    column.desc.clone()
                };
                descriptors.insert(
                    column.name.clone(),
                    MetricDesc::new(query.metric_fq_name(column), help, kind, &label_refs),
                );
            }
        }
        let ttl = if disable_cache { 0.0 } else { query.ttl };
        let predicate_cache = vec![None; query.predicate_queries.len()];
        Self {
            name: query.name.clone(),
            branch: query.branch.clone(),
            ttl,
            descriptors,
            result: Vec::new(),
            err: None,
            last_scrape: None,
            predicate_cache,
            query,
        }
    }

    /// Number of samples currently cached.
    #[must_use]
    pub fn result_len(&self) -> usize {
        self.result.len()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.err.as_deref()
    }

    /// A cached result is replayed when it is younger than the TTL and the
    /// previous execution did not error.
    pub(crate) fn cache_fresh(&self, now: Instant) -> bool {
        self.err.is_none()
            && self.ttl > 0.0
            && self
                .last_scrape
                .is_some_and(|at| now.duration_since(at).as_secs_f64() < self.ttl)
    }

    /// Cached verdict for predicate `idx`, or `None` when the entry is
    /// missing, expired, or caching is disabled for this predicate.
    pub(crate) fn cached_predicate(&self, idx: usize, now: Instant) -> Option<bool> {
        let ttl = self.query.predicate_queries.get(idx)?.ttl;
        if ttl <= 0.0 {
            return None;
        }
        let entry = (*self.predicate_cache.get(idx)?)?;
        if now.duration_since(entry.at).as_secs_f64() < ttl {
            Some(entry.pass)
        } else {
            None
        }
    }

    /// Evaluate the predicate chain in order. Returns `Ok(false)` as soon as
    /// one predicate fails, caching each fresh verdict.
    async fn eval_predicates(&mut self, pool: &PgPool, now: Instant) -> Result<bool> {
        for idx in 0..self.query.predicate_queries.len() {
            let pass = if let Some(cached) = self.cached_predicate(idx, now) {
                cached
            } else {
                let pq = self.query.predicate_queries.get(idx).cloned().unwrap_or_default();
                let row = execute_with_deadline(
                    pool,
                    &pq.sql,
                    self.query.timeout_duration(),
                    FetchMode::Optional,
                )
                .await
                .with_context(|| {
                    let label = if pq.name.is_empty() { idx.to_string() } else { pq.name.clone() };
                    format!("predicate {label} of query {} failed", self.name)
                })?;
                let pass = row
                    .first()
                    .map(|r| truthy(&decode_scalar(r, 0)))
                    .unwrap_or(false);
                if let Some(slot) = self.predicate_cache.get_mut(idx) {
                    *slot = Some(PredicateCacheEntry { at: now, pass });
                }
                pass
            };
            if !pass {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run one scrape of this collector, appending samples to `out`.
    #[instrument(skip(self, pool, out), fields(query = %self.name, branch = %self.branch))]
    pub async fn collect(&mut self, pool: &PgPool, out: &mut Vec<MetricSample>) -> CollectOutcome {
        let begin = Instant::now();

        if self.cache_fresh(begin) {
            out.extend(self.result.iter().cloned());
            return CollectOutcome::Hit(self.result.len());
        }

        match self.eval_predicates(pool, begin).await {
            Ok(true) => {}
            Ok(false) => {
                self.err = None;
                return CollectOutcome::PredicateSkip;
            }
            Err(err) => {
                self.err = Some(format!("{err:#}"));
                return CollectOutcome::Error(err);
            }
        }

        let rows = match execute_with_deadline(
            pool,
            &self.query.sql,
            self.query.timeout_duration(),
            FetchMode::All,
        )
        .await
        {
            Ok(rows) => rows,
            Err(err) => {
                let err = err.context(format!("query {} failed", self.name));
                self.err = Some(format!("{err:#}"));
                return CollectOutcome::Error(err);
            }
        };

        let samples = self.rows_to_samples(&rows);
        self.result = samples;
        self.err = None;
        self.last_scrape = Some(begin);
        out.extend(self.result.iter().cloned());
        CollectOutcome::Collected(self.result.len())
    }

    /// Map result rows to samples: label columns resolve to strings, metric
    /// columns to scaled floats. Columns defined in the catalog but absent
    /// from the result set behave like NULL.
    fn rows_to_samples(&self, rows: &[PgRow]) -> Vec<MetricSample> {
        let Some(first) = rows.first() else {
            return Vec::new();
        };
        let ordinals: HashMap<&str, usize> = first
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.name(), idx))
            .collect();

        let mut samples = Vec::with_capacity(rows.len() * self.query.metric_names.len());
        for row in rows {
            let label_values: Vec<String> = self
                .query
                .label_names
                .iter()
                .map(|name| {
                    ordinals
                        .get(name.as_str())
                        .map(|&idx| cast_string(&decode_scalar(row, idx)))
                        .unwrap_or_default()
                })
                .collect();
            for col_name in &self.query.metric_names {
                let Some(desc) = self.descriptors.get(col_name) else {
                    continue;
                };
                let column = self.query.column(col_name);
                let value = ordinals
                    .get(col_name.as_str())
                    .map(|&idx| decode_scalar(row, idx))
                    .unwrap_or(crate::scrape::cast::ScalarValue::Null);
                samples.push(MetricSample::new(
                    desc,
                    label_values.clone(),
                    cast_float64(&value, column),
                ));
            }
        }
        samples
    }
}

enum FetchMode {
    All,
    Optional,
}

/// Execute SQL over the simple query protocol (no prepared statements, so
/// the same path works against PgBouncer) under an optional deadline.
async fn execute_with_deadline(
    pool: &PgPool,
    sql: &str,
    deadline: Option<std::time::Duration>,
    mode: FetchMode,
) -> Result<Vec<PgRow>> {
    let fetch = async {
        match mode {
            FetchMode::All => pool.fetch_all(sql).await,
            FetchMode::Optional => pool.fetch_optional(sql).await.map(|row| row.into_iter().collect()),
        }
    };
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, fetch)
            .await
            .map_err(|_| anyhow!("timed out after {deadline:?}"))?
            .map_err(Into::into),
        None => fetch.await.map_err(Into::into),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_query;
    use std::time::Duration;

    fn gauge_query(ttl: f64, predicate_ttl: Option<f64>) -> Arc<Query> {
        let predicates = predicate_ttl.map_or(String::new(), |ttl| {
            format!("  predicate_queries:\n    - name: p1\n      sql: SELECT true\n      ttl: {ttl}\n")
        });
        let yaml = format!(
            "q:\n  sql: SELECT 'db' AS datname, 1 AS value\n  ttl: {ttl}\n{predicates}  metrics:\n    - datname: {{usage: label}}\n    - value: {{usage: gauge}}\n"
        );
        Arc::new(parse_query(&yaml).unwrap())
    }

    #[test]
    fn test_descriptors_prebuilt() {
        let c = Collector::new(gauge_query(0.0, None), false);
        let desc = c.descriptors.get("value").unwrap();
        assert_eq!(desc.name, "q_value");
        assert_eq!(desc.labels, vec!["datname"]);
        assert_eq!(desc.kind, ValueKind::Gauge);
    }

    #[test]
    fn test_disable_cache_zeroes_ttl() {
        let c = Collector::new(gauge_query(3600.0, None), true);
        assert_eq!(c.ttl, 0.0);
    }

    #[test]
    fn test_cache_freshness() {
        let mut c = Collector::new(gauge_query(3600.0, None), false);
        let now = Instant::now();
        assert!(!c.cache_fresh(now), "empty cache is never fresh");

        c.last_scrape = Some(now - Duration::from_secs(1));
        assert!(c.cache_fresh(now));

        c.err = Some("boom".into());
        assert!(!c.cache_fresh(now), "an errored result is never fresh");

        c.err = None;
        c.ttl = 0.0;
        assert!(!c.cache_fresh(now), "ttl 0 disables the cache");
    }

    #[test]
    fn test_predicate_cache_hit() {
        let mut c = Collector::new(gauge_query(0.0, Some(10.0)), false);
        let now = Instant::now();

        c.predicate_cache[0] = Some(PredicateCacheEntry {
            at: now - Duration::from_secs(1),
            pass: true,
        });
        assert_eq!(c.cached_predicate(0, now), Some(true));

        c.predicate_cache[0] = Some(PredicateCacheEntry {
            at: now - Duration::from_secs(1),
            pass: false,
        });
        assert_eq!(c.cached_predicate(0, now), Some(false));
    }

    #[test]
    fn test_predicate_cache_expiry() {
        let mut c = Collector::new(gauge_query(0.0, Some(10.0)), false);
        let now = Instant::now();

        c.predicate_cache[0] = Some(PredicateCacheEntry {
            at: now - Duration::from_secs(11),
            pass: true,
        });
        assert_eq!(c.cached_predicate(0, now), None, "expired entry must re-run");
    }

    #[test]
    fn test_predicate_cache_disabled_by_ttl_zero() {
        let mut c = Collector::new(gauge_query(0.0, Some(0.0)), false);
        let now = Instant::now();

        c.predicate_cache[0] = Some(PredicateCacheEntry { at: now, pass: true });
        assert_eq!(c.cached_predicate(0, now), None, "ttl 0 ignores the cache");
    }

    #[tokio::test]
    async fn test_cached_collect_does_not_touch_database() {
        // lazy pool against an unroutable port: any query would fail, so a
        // returned Hit proves the database was never contacted
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgresql://u@127.0.0.1:1/postgres")
            .unwrap();

        let mut c = Collector::new(gauge_query(3600.0, None), false);
        let desc = c.descriptors.get("value").unwrap().clone();
        c.result = vec![MetricSample::new(&desc, vec!["db".into()], 1.0)];
        c.last_scrape = Some(Instant::now() - Duration::from_secs(1));

        let mut out = Vec::new();
        match c.collect(&pool, &mut out).await {
            CollectOutcome::Hit(n) => assert_eq!(n, 1),
            other => panic!("expected cache hit, got {other:?}"),
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 1.0);
    }

    #[tokio::test]
    async fn test_cached_false_predicate_skips_without_database() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgresql://u@127.0.0.1:1/postgres")
            .unwrap();

        let mut c = Collector::new(gauge_query(0.0, Some(10.0)), false);
        c.predicate_cache[0] = Some(PredicateCacheEntry {
            at: Instant::now(),
            pass: false,
        });

        let mut out = Vec::new();
        match c.collect(&pool, &mut out).await {
            CollectOutcome::PredicateSkip => {}
            other => panic!("expected predicate skip, got {other:?}"),
        }
        assert!(out.is_empty());
        assert!(c.last_error().is_none());
    }
}
