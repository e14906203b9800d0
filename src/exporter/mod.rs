//! The exporter: a primary server plus auto-discovered peripheral servers,
//! the Prometheus scrape pipeline, internal metrics, the lock-free health
//! snapshot with its background probe loop, and atomic hot reload.

use crate::catalog::validate::validate_label_name;
use crate::catalog::{Catalog, load_config, parse_config};
use crate::pgurl::{replace_datname, shadow_pgurl};
use crate::scrape::sample::{MetricDesc, MetricSample, ValueKind, render_text};
use crate::scrape::{ProbeTarget, Server, ServerOpts};
use crate::util::{parse_const_labels, parse_csv};
use anyhow::{Context, Result, anyhow};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::instrument;

pub mod handlers;
pub mod health;
pub mod shutdown;

use health::HealthSnapshot;
pub use health::HealthStatus;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = if let Some(hash) = built_info::GIT_COMMIT_HASH {
    hash
} else {
    "unknown"
};

pub const GIT_BRANCH: &str = if let Some(branch) = built_info::GIT_HEAD_REF {
    branch
} else {
    "unknown"
};

/// Multi-line version banner used by `/version` and `--version`.
#[must_use]
pub fn version_string() -> String {
    format!(
        "pg_exporter version {}\nrevision: {}\nbranch: {}\nrust version: {}\nbuild date: {}\nos: {}\narch: {}",
        built_info::PKG_VERSION,
        GIT_COMMIT_HASH,
        GIT_BRANCH,
        built_info::RUSTC_VERSION,
        built_info::BUILT_TIME_UTC,
        built_info::CFG_OS,
        built_info::CFG_TARGET_ARCH,
    )
}

/// Interval of the background health probe loop.
const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Pre-built descriptors for the exporter's own series.
#[derive(Debug)]
struct InternalDescs {
    up: Arc<MetricDesc>,
    version: Arc<MetricDesc>,
    in_recovery: Arc<MetricDesc>,
    build_info: Arc<MetricDesc>,
    exporter_up: Arc<MetricDesc>,
    exporter_uptime: Arc<MetricDesc>,
    last_scrape_time: Arc<MetricDesc>,
    scrape_duration: Arc<MetricDesc>,
    scrape_total_count: Arc<MetricDesc>,
    scrape_error_count: Arc<MetricDesc>,
    server_scrape_duration: Arc<MetricDesc>,
    server_scrape_total_seconds: Arc<MetricDesc>,
    server_scrape_total_count: Arc<MetricDesc>,
    server_scrape_error_count: Arc<MetricDesc>,
    query_cache_ttl: Arc<MetricDesc>,
    query_scrape_total_count: Arc<MetricDesc>,
    query_scrape_error_count: Arc<MetricDesc>,
    query_scrape_predicate_skip_count: Arc<MetricDesc>,
    query_scrape_duration: Arc<MetricDesc>,
    query_scrape_metric_count: Arc<MetricDesc>,
    query_scrape_hit_count: Arc<MetricDesc>,
}

impl InternalDescs {
    fn new(ns: &str) -> Self {
        Self {
            up: MetricDesc::new(
                format!("{ns}_up"),
                "last scrape was able to connect to the server: 1 for yes, 0 for no",
                ValueKind::Gauge,
                &[],
            ),
            version: MetricDesc::new(
                format!("{ns}_version"),
                "server version number",
                ValueKind::Gauge,
                &[],
            ),
            in_recovery: MetricDesc::new(
                format!("{ns}_in_recovery"),
                "server is in recovery mode? 1 for yes 0 for no",
                ValueKind::Gauge,
                &[],
            ),
            build_info: MetricDesc::new(
                format!("{ns}_exporter_build_info"),
                "A metric with a constant '1' value labeled with the version, revision, branch, build date and platform pg_exporter was built from.",
                ValueKind::Gauge,
                &["version", "revision", "branch", "builddate", "rustversion", "os", "arch"],
            ),
            exporter_up: MetricDesc::new(
                format!("{ns}_exporter_up"),
                "always be 1 if your could retrieve metrics",
                ValueKind::Gauge,
                &[],
            ),
            exporter_uptime: MetricDesc::new(
                format!("{ns}_exporter_uptime"),
                "seconds since exporter primary server inited",
                ValueKind::Gauge,
                &[],
            ),
            last_scrape_time: MetricDesc::new(
                format!("{ns}_exporter_last_scrape_time"),
                "last scrape timestamp",
                ValueKind::Gauge,
                &[],
            ),
            scrape_duration: MetricDesc::new(
                format!("{ns}_exporter_scrape_duration"),
                "seconds exporter spending on scraping",
                ValueKind::Gauge,
                &[],
            ),
            scrape_total_count: MetricDesc::new(
                format!("{ns}_exporter_scrape_total_count"),
                "times exporter was scraped for metrics",
                ValueKind::Counter,
                &[],
            ),
            scrape_error_count: MetricDesc::new(
                format!("{ns}_exporter_scrape_error_count"),
                "times exporter was scraped for metrics and failed",
                ValueKind::Counter,
                &[],
            ),
            server_scrape_duration: MetricDesc::new(
                format!("{ns}_exporter_server_scrape_duration"),
                "seconds exporter server spending on scraping last scrape",
                ValueKind::Gauge,
                &["datname"],
            ),
            server_scrape_total_seconds: MetricDesc::new(
                format!("{ns}_exporter_server_scrape_total_seconds"),
                "cumulative total seconds exporter server spending on scraping",
                ValueKind::Gauge,
                &["datname"],
            ),
            server_scrape_total_count: MetricDesc::new(
                format!("{ns}_exporter_server_scrape_total_count"),
                "times exporter server was scraped for metrics",
                ValueKind::Gauge,
                &["datname"],
            ),
            server_scrape_error_count: MetricDesc::new(
                format!("{ns}_exporter_server_scrape_error_count"),
                "cumulative times exporter server scrape failed (fatal scrape failures only)",
                ValueKind::Gauge,
                &["datname"],
            ),
            query_cache_ttl: MetricDesc::new(
                format!("{ns}_exporter_query_cache_ttl"),
                "time to live of query cache",
                ValueKind::Gauge,
                &["datname", "query"],
            ),
            query_scrape_total_count: MetricDesc::new(
                format!("{ns}_exporter_query_scrape_total_count"),
                "times the query was executed or served from cache",
                ValueKind::Gauge,
                &["datname", "query"],
            ),
            query_scrape_error_count: MetricDesc::new(
                format!("{ns}_exporter_query_scrape_error_count"),
                "times the query failed",
                ValueKind::Gauge,
                &["datname", "query"],
            ),
            query_scrape_predicate_skip_count: MetricDesc::new(
                format!("{ns}_exporter_query_scrape_predicate_skip_count"),
                "times the query was skipped due to a predicate returning false",
                ValueKind::Gauge,
                &["datname", "query"],
            ),
            query_scrape_duration: MetricDesc::new(
                format!("{ns}_exporter_query_scrape_duration"),
                "seconds query spending on scraping",
                ValueKind::Gauge,
                &["datname", "query"],
            ),
            query_scrape_metric_count: MetricDesc::new(
                format!("{ns}_exporter_query_scrape_metric_count"),
                "number of metrics scraped from this query",
                ValueKind::Gauge,
                &["datname", "query"],
            ),
            query_scrape_hit_count: MetricDesc::new(
                format!("{ns}_exporter_query_scrape_hit_count"),
                "times this query was served from cache",
                ValueKind::Gauge,
                &["datname", "query"],
            ),
        }
    }
}

#[derive(Debug)]
struct ExporterInner {
    queries: Catalog,
    server: Server,
    last_scrape_time: f64,
    scrape_duration: f64,
    scrape_total_count: f64,
    scrape_error_count: f64,
}

#[derive(Debug)]
struct HealthLoop {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Configures and builds an [`Exporter`].
#[derive(Debug, Clone, Default)]
pub struct ExporterBuilder {
    dsn: String,
    config_path: Option<PathBuf>,
    config_text: Option<String>,
    const_labels: String,
    tags: String,
    namespace: Option<String>,
    disable_cache: bool,
    disable_intro: bool,
    auto_discovery: bool,
    fail_fast: bool,
    exclude_database: String,
    include_database: String,
    connect_timeout: u64,
}

impl ExporterBuilder {
    #[must_use]
    pub fn new(dsn: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            connect_timeout: 100,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Load the catalog from a YAML string instead of a file; mutually
    /// exclusive with [`Self::config_path`].
    #[must_use]
    pub fn config_text(mut self, content: &str) -> Self {
        self.config_text = Some(content.to_string());
        self
    }

    /// `k=v,...` labels attached to every exported series.
    #[must_use]
    pub fn const_labels(mut self, labels: &str) -> Self {
        self.const_labels = labels.to_string();
        self
    }

    /// Comma separated scheduling tags matched against query tags.
    #[must_use]
    pub fn tags(mut self, tags: &str) -> Self {
        self.tags = tags.to_string();
        self
    }

    /// Override the metric namespace (defaults to `pg`, or `pgbouncer` when
    /// the primary is in PgBouncer mode).
    #[must_use]
    pub fn namespace(mut self, ns: &str) -> Self {
        if !ns.is_empty() {
            self.namespace = Some(ns.to_string());
        }
        self
    }

    #[must_use]
    pub const fn disable_cache(mut self, flag: bool) -> Self {
        self.disable_cache = flag;
        self
    }

    /// Disable the exporter's own metrics, exposing query metrics only.
    #[must_use]
    pub const fn disable_intro(mut self, flag: bool) -> Self {
        self.disable_intro = flag;
        self
    }

    #[must_use]
    pub const fn auto_discovery(mut self, flag: bool) -> Self {
        self.auto_discovery = flag;
        self
    }

    /// Fail construction when the target is unreachable instead of letting
    /// the probe loop catch up later.
    #[must_use]
    pub const fn fail_fast(mut self, flag: bool) -> Self {
        self.fail_fast = flag;
        self
    }

    /// Comma separated databases never spawned by auto-discovery.
    #[must_use]
    pub fn exclude_database(mut self, csv: &str) -> Self {
        self.exclude_database = csv.to_string();
        self
    }

    /// When non-empty, only these databases may be spawned.
    #[must_use]
    pub fn include_database(mut self, csv: &str) -> Self {
        self.include_database = csv.to_string();
        self
    }

    /// Probe / pre-check deadline in milliseconds.
    #[must_use]
    pub const fn connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout = ms;
        self
    }

    /// Build the exporter: load and validate the catalog, create the primary
    /// server, run a best-effort connectivity check and start the health
    /// loop.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid configuration, const-label conflicts, an
    /// unparseable DSN, or an unreachable target when fail-fast is set.
    pub async fn build(self) -> Result<Exporter> {
        let queries: HashMap<String, Arc<crate::catalog::Query>> =
            match (&self.config_path, &self.config_text) {
                (Some(_), Some(_)) => {
                    return Err(anyhow!("config path and config text are mutually exclusive"));
                }
                (Some(path), None) => load_config(path)
                    .with_context(|| format!("fail loading config {}", path.display()))?,
                (None, Some(text)) => {
                    let mut parsed = parse_config(text).context("fail parsing config")?;
                    crate::catalog::finalize_queries(&mut parsed, "<inline>");
                    parsed.into_iter().map(|(k, v)| (k, Arc::new(v))).collect()
                }
                (None, None) => HashMap::new(),
            };

        let const_labels = parse_const_labels(&self.const_labels);
        for key in const_labels.keys() {
            validate_label_name(key).with_context(|| format!("invalid const label {key:?}"))?;
        }
        crate::catalog::validate::validate_const_label_conflicts(
            &const_labels,
            &queries,
            self.disable_intro,
        )?;
        let catalog: Catalog = Arc::new(queries);

        let tags = parse_csv(&self.tags);
        let server = Server::new(
            &self.dsn,
            ServerOpts {
                queries: catalog.clone(),
                disable_cache: self.disable_cache,
                tags: tags.clone(),
                connect_timeout: self.connect_timeout,
            },
        )?;
        let pgbouncer_mode = server.pgbouncer_mode;
        let namespace = self.namespace.unwrap_or_else(|| {
            if pgbouncer_mode {
                "pgbouncer".to_string()
            } else {
                "pg".to_string()
            }
        });
        let probe = ProbeTarget::new(&self.dsn, self.connect_timeout, pgbouncer_mode)?;

        tracing::debug!(queries = catalog.len(), "exporter init");

        let exporter = Exporter {
            dsn: self.dsn,
            config_path: self.config_path,
            namespace: namespace.clone(),
            const_labels,
            tags,
            disable_cache: self.disable_cache,
            disable_intro: self.disable_intro,
            auto_discovery: self.auto_discovery,
            pgbouncer_mode,
            exclude_database: parse_csv(&self.exclude_database).into_iter().collect(),
            include_database: parse_csv(&self.include_database).into_iter().collect(),
            connect_timeout: self.connect_timeout,
            internal: InternalDescs::new(&namespace),
            inner: RwLock::new(ExporterInner {
                queries: catalog,
                server,
                last_scrape_time: 0.0,
                scrape_duration: 0.0,
                scrape_total_count: 0.0,
                scrape_error_count: 0.0,
            }),
            servers: RwLock::new(HashMap::new()),
            health: Arc::new(HealthSnapshot::new()),
            probe,
            health_loop: Mutex::new(None),
        };

        // Best-effort connectivity check: startup is not blocked by a down
        // target unless fail-fast is requested. The probe loop keeps
        // retrying and the scrape path reconnects when the target returns.
        if let Err(err) = exporter.check().await {
            if self.fail_fast {
                return Err(err.context(format!(
                    "fail connecting to primary server {}",
                    shadow_pgurl(&exporter.dsn)
                )));
            }
            tracing::error!(
                url = shadow_pgurl(&exporter.dsn),
                error = format!("{err:#}"),
                "fail connecting to primary server, startup will continue"
            );
        }

        exporter.start_health_loop().await;
        Ok(exporter)
    }
}

/// The aggregate the HTTP surface talks to. One write lock serializes
/// scrapes against reloads; health endpoints read only the atomic snapshot.
#[derive(Debug)]
pub struct Exporter {
    dsn: String,
    config_path: Option<PathBuf>,
    namespace: String,
    const_labels: HashMap<String, String>,
    tags: Vec<String>,
    disable_cache: bool,
    disable_intro: bool,
    auto_discovery: bool,
    #[allow(dead_code)]
    pgbouncer_mode: bool,
    exclude_database: HashSet<String>,
    include_database: HashSet<String>,
    connect_timeout: u64,

    internal: InternalDescs,
    inner: RwLock<ExporterInner>,
    servers: RwLock<HashMap<String, Arc<Mutex<Server>>>>,

    health: Arc<HealthSnapshot>,
    probe: ProbeTarget,
    health_loop: Mutex<Option<HealthLoop>>,
}

impl Exporter {
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn up(&self) -> bool {
        self.health.up()
    }

    #[must_use]
    pub fn recovery(&self) -> bool {
        self.health.recovery()
    }

    #[must_use]
    pub fn status(&self) -> HealthStatus {
        self.health.status()
    }

    /// Probe the primary once and fold the result into the health snapshot.
    ///
    /// # Errors
    ///
    /// Returns the probe error; the snapshot is updated either way.
    pub async fn check(&self) -> Result<()> {
        match self.probe.probe().await {
            Ok(result) => {
                self.health
                    .update_with_startup(result.up, result.recovery, result.starting);
                Ok(())
            }
            Err(err) => {
                self.health.update_with_startup(false, false, false);
                Err(err)
            }
        }
    }

    /// Start the background probe loop. Idempotent.
    pub async fn start_health_loop(&self) {
        let mut guard = self.health_loop.lock().await;
        if guard.is_some() {
            return;
        }
        let (stop, mut stopped) = watch::channel(false);
        let probe = self.probe.clone();
        let health = self.health.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_PROBE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        match probe.probe().await {
                            Ok(result) => {
                                health.update_with_startup(result.up, result.recovery, result.starting);
                            }
                            Err(err) => {
                                tracing::debug!(error = format!("{err:#}"), "health probe failed");
                                health.update_with_startup(false, false, false);
                            }
                        }
                    }
                }
            }
        });
        *guard = Some(HealthLoop { stop, handle });
    }

    /// Signal the probe loop to stop and wait for it. Idempotent.
    pub async fn stop_health_loop(&self) {
        let taken = self.health_loop.lock().await.take();
        if let Some(health_loop) = taken {
            let _ = health_loop.stop.send(true);
            let _ = health_loop.handle.await;
        }
    }

    /// Snapshot of the peripheral servers.
    pub async fn iterate_servers(&self) -> Vec<Arc<Mutex<Server>>> {
        self.servers.read().await.values().cloned().collect()
    }

    /// Sorted names of the peripheral servers.
    pub async fn peripheral_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    fn discovery_allows(&self, dbname: &str, primary_database: &str) -> bool {
        if dbname == primary_database {
            return false; // the primary's own database is never auto-managed
        }
        if self.exclude_database.contains(dbname) {
            return false;
        }
        if !self.include_database.is_empty() && !self.include_database.contains(dbname) {
            return false;
        }
        true
    }

    async fn apply_database_changes(
        &self,
        catalog: Catalog,
        primary_database: &str,
        changes: Vec<(String, bool)>,
    ) {
        for (dbname, added) in changes {
            if !self.discovery_allows(&dbname, primary_database) {
                tracing::debug!(database = dbname, added, "skip database change");
                continue;
            }
            if added {
                self.create_server(&dbname, catalog.clone()).await;
            } else {
                self.remove_server(&dbname).await;
            }
        }
    }

    async fn create_server(&self, dbname: &str, catalog: Catalog) {
        let new_dsn = replace_datname(&self.dsn, dbname);
        match Server::new(
            &new_dsn,
            ServerOpts {
                queries: catalog,
                disable_cache: self.disable_cache,
                tags: self.tags.clone(),
                connect_timeout: self.connect_timeout,
            },
        ) {
            Ok(mut server) => {
                server.forked = true;
                self.servers
                    .write()
                    .await
                    .insert(dbname.to_string(), Arc::new(Mutex::new(server)));
                tracing::info!(database = dbname, "database installed due to auto-discovery");
            }
            Err(err) => {
                tracing::warn!(
                    database = dbname,
                    error = format!("{err:#}"),
                    "fail spawning peripheral server"
                );
            }
        }
    }

    async fn remove_server(&self, dbname: &str) {
        let removed = self.servers.write().await.remove(dbname);
        if let Some(server) = removed {
            // close asynchronously to keep the scrape path off network teardown
            tokio::spawn(async move {
                server.lock().await.close().await;
            });
            tracing::warn!(database = dbname, "database removed due to auto-discovery");
        }
    }

    /// Run one full scrape under the exporter write lock: primary first,
    /// then peripheral servers, then the exporter's own series.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn collect_samples(&self) -> Vec<MetricSample> {
        let mut inner = self.inner.write().await;
        let begin = Instant::now();
        let mut samples = Vec::new();

        inner.server.collect(&mut samples).await;

        let changes = inner.server.take_db_changes();
        if self.auto_discovery && !changes.is_empty() {
            let catalog = inner.queries.clone();
            let primary_database = inner.server.database.clone();
            self.apply_database_changes(catalog, &primary_database, changes)
                .await;
        }

        let peripherals = self.iterate_servers().await;
        for server in &peripherals {
            server.lock().await.collect(&mut samples).await;
        }

        let up = inner.server.up;
        let recovery = inner.server.recovery;
        let version = inner.server.version;
        self.health.update(up, recovery);

        if !self.disable_intro {
            inner.scrape_total_count += 1.0;
            if !up {
                inner.scrape_error_count += 1.0;
            }
            inner.scrape_duration = begin.elapsed().as_secs_f64();
            inner.last_scrape_time = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);

            self.append_internal_samples(&inner, up, recovery, version, &mut samples);
            self.append_server_samples(&inner.server, &mut samples);
            for server in &peripherals {
                let server = server.lock().await;
                self.append_server_samples(&server, &mut samples);
            }
        }

        samples
    }

    /// Scrape and render the text exposition.
    ///
    /// # Errors
    ///
    /// Returns an error when text encoding fails.
    pub async fn collect_text(&self) -> Result<String> {
        let samples = self.collect_samples().await;
        render_text(&samples, &self.const_labels)
    }

    fn append_internal_samples(
        &self,
        inner: &ExporterInner,
        up: bool,
        recovery: bool,
        version: i64,
        samples: &mut Vec<MetricSample>,
    ) {
        let descs = &self.internal;
        samples.push(MetricSample::new(&descs.up, vec![], if up { 1.0 } else { 0.0 }));
        samples.push(MetricSample::new(&descs.version, vec![], version as f64));
        samples.push(MetricSample::new(
            &descs.in_recovery,
            vec![],
            if up && recovery { 1.0 } else { 0.0 },
        ));
        samples.push(MetricSample::new(
            &descs.build_info,
            vec![
                built_info::PKG_VERSION.to_string(),
                GIT_COMMIT_HASH.to_string(),
                GIT_BRANCH.to_string(),
                built_info::BUILT_TIME_UTC.to_string(),
                built_info::RUSTC_VERSION.to_string(),
                built_info::CFG_OS.to_string(),
                built_info::CFG_TARGET_ARCH.to_string(),
            ],
            1.0,
        ));
        samples.push(MetricSample::new(&descs.exporter_up, vec![], 1.0));
        samples.push(MetricSample::new(&descs.exporter_uptime, vec![], inner.server.uptime()));
        samples.push(MetricSample::new(&descs.last_scrape_time, vec![], inner.last_scrape_time));
        samples.push(MetricSample::new(&descs.scrape_duration, vec![], inner.scrape_duration));
        samples.push(MetricSample::new(
            &descs.scrape_total_count,
            vec![],
            inner.scrape_total_count,
        ));
        samples.push(MetricSample::new(
            &descs.scrape_error_count,
            vec![],
            inner.scrape_error_count,
        ));
    }

    fn append_server_samples(&self, server: &Server, samples: &mut Vec<MetricSample>) {
        let descs = &self.internal;
        let datname = server.database.clone();
        samples.push(MetricSample::new(
            &descs.server_scrape_duration,
            vec![datname.clone()],
            server.last_scrape_duration(),
        ));
        samples.push(MetricSample::new(
            &descs.server_scrape_total_seconds,
            vec![datname.clone()],
            server.total_time,
        ));
        samples.push(MetricSample::new(
            &descs.server_scrape_total_count,
            vec![datname.clone()],
            server.total_count,
        ));
        samples.push(MetricSample::new(
            &descs.server_scrape_error_count,
            vec![datname.clone()],
            server.error_count,
        ));

        let stats = server.stats();
        let per_query = [
            (&descs.query_cache_ttl, &stats.cache_ttl),
            (&descs.query_scrape_total_count, &stats.total_count),
            (&descs.query_scrape_hit_count, &stats.hit_count),
            (&descs.query_scrape_error_count, &stats.error_count),
            (
                &descs.query_scrape_predicate_skip_count,
                &stats.predicate_skip_count,
            ),
            (&descs.query_scrape_metric_count, &stats.metric_count),
            (&descs.query_scrape_duration, &stats.duration),
        ];
        for (desc, map) in per_query {
            for (query, value) in map {
                samples.push(MetricSample::new(
                    desc,
                    vec![datname.clone(), query.clone()],
                    *value,
                ));
            }
        }
    }

    /// Reparse the catalog from the configured path and swap it in
    /// atomically: every server is unplanned, its collectors dropped and its
    /// stats reset. In-flight scrapes finish with the old catalog; the next
    /// scrape re-plans against the new one. Connections are never closed by
    /// a reload.
    ///
    /// # Errors
    ///
    /// Returns an error when no config path is set, the new catalog fails to
    /// load, or it conflicts with the configured constant labels.
    #[instrument(skip(self), err)]
    pub async fn reload(&self) -> Result<()> {
        let Some(path) = &self.config_path else {
            return Err(anyhow!("no config path to reload from"));
        };
        tracing::debug!(path = %path.display(), "reload requested");
        let queries =
            load_config(path).with_context(|| format!("fail loading config {}", path.display()))?;
        crate::catalog::validate::validate_const_label_conflicts(
            &self.const_labels,
            &queries,
            self.disable_intro,
        )
        .context("invalid configuration with current constant labels")?;
        let catalog: Catalog = Arc::new(queries);

        let mut inner = self.inner.write().await;
        inner.queries = catalog.clone();
        inner.server.set_queries(catalog.clone());
        for server in self.iterate_servers().await {
            server.lock().await.set_queries(catalog.clone());
        }
        tracing::info!(queries = catalog.len(), "configuration reloaded");
        Ok(())
    }

    /// Plain-text status dump for `/stat`.
    pub async fn stat(&self) -> String {
        let inner = self.inner.read().await;
        let mut out = String::new();
        out.push_str(&format!("pg_exporter {}\n", built_info::PKG_VERSION));
        out.push_str(&format!("target:    {}\n", shadow_pgurl(&self.dsn)));
        out.push_str(&format!("namespace: {}\n", self.namespace));
        out.push_str(&format!("health:    {}\n", self.status()));
        out.push_str(&format!(
            "scrapes:   {} total, {} errors\n",
            inner.scrape_total_count, inner.scrape_error_count
        ));
        out.push('\n');
        out.push_str(&inner.server.stat());
        drop(inner);

        let peripherals = self.iterate_servers().await;
        if !peripherals.is_empty() {
            out.push_str(&format!("\nperipheral servers ({}):\n", peripherals.len()));
            for server in &peripherals {
                let server = server.lock().await;
                out.push('\n');
                out.push_str(&server.stat());
            }
        }
        out
    }

    /// HTML catalog dump for `/explain`.
    pub async fn explain(&self) -> String {
        let inner = self.inner.read().await;
        format!(
            "<html><head><title>pg_exporter catalog</title></head><body><h1>pg_exporter catalog</h1>\n{}</body></html>",
            inner.server.explain_html()
        )
    }

    /// Force a planning pass on the primary and return the explain dump,
    /// used by `--explain`.
    pub async fn plan_and_explain(&self) -> String {
        {
            let mut inner = self.inner.write().await;
            if !inner.server.planned {
                inner.server.plan();
            }
        }
        self.explain().await
    }

    /// Stop the probe loop and close every pool.
    pub async fn close(&self) {
        self.stop_health_loop().await;
        self.inner.read().await.server.close().await;
        for server in self.iterate_servers().await {
            server.lock().await.close().await;
        }
        tracing::info!("pg exporter closed");
    }
}
