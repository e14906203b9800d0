//! Metric samples and their rendering.
//!
//! The catalog and the set of discovered databases are both dynamic, so the
//! exporter cannot pre-register descriptors. Instead every scrape produces a
//! flat list of [`MetricSample`]s which are materialized into a fresh
//! registry and encoded in one pass. Rendering is deliberately panic-free:
//! a malformed family or sample is dropped with a log line, never raised.

use anyhow::{Context, Result};
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Gauge,
    Counter,
}

/// Descriptor shared by all samples of one metric family: fully qualified
/// name, help text, value kind and the variable label names in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDesc {
    pub name: String,
    pub help: String,
    pub kind: ValueKind,
    pub labels: Vec<String>,
}

impl MetricDesc {
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>, kind: ValueKind, labels: &[&str]) -> Arc<Self> {
        let help = help.into();
        Arc::new(Self {
            name: name.into(),
            // the client library rejects empty help strings
            help: if help.is_empty() { "N/A".to_string() } else { help },
            kind,
            labels: labels.iter().map(ToString::to_string).collect(),
        })
    }
}

/// One fully labeled sample, ready to be rendered.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub desc: Arc<MetricDesc>,
    /// Label values aligned with `desc.labels`.
    pub label_values: Vec<String>,
    pub value: f64,
}

impl MetricSample {
    #[must_use]
    pub fn new(desc: &Arc<MetricDesc>, label_values: Vec<String>, value: f64) -> Self {
        Self {
            desc: desc.clone(),
            label_values,
            value,
        }
    }
}

enum FamilyVec {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

/// Render samples into the Prometheus text exposition format. Samples of the
/// same family (by name) are merged; the first descriptor seen for a name
/// wins. Constant labels are attached to every family.
///
/// # Errors
///
/// Returns an error only when text encoding itself fails; malformed families
/// and samples are skipped.
pub fn render_text(samples: &[MetricSample], const_labels: &HashMap<String, String>) -> Result<String> {
    let registry = Registry::new();
    let mut families: HashMap<String, FamilyVec> = HashMap::new();

    for sample in samples {
        let desc = &sample.desc;
        let family = match families.entry(desc.name.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut opts = Opts::new(desc.name.clone(), desc.help.clone());
                if !const_labels.is_empty() {
                    opts = opts.const_labels(const_labels.clone());
                }
                let label_refs: Vec<&str> = desc.labels.iter().map(String::as_str).collect();
                let family = match desc.kind {
                    ValueKind::Gauge => GaugeVec::new(opts, &label_refs).map(FamilyVec::Gauge),
                    ValueKind::Counter => CounterVec::new(opts, &label_refs).map(FamilyVec::Counter),
                };
                let family = match family {
                    Ok(f) => f,
                    Err(err) => {
                        tracing::warn!(metric = desc.name, %err, "dropping invalid metric family");
                        continue;
                    }
                };
                let registered = match &family {
                    FamilyVec::Gauge(v) => registry.register(Box::new(v.clone())),
                    FamilyVec::Counter(v) => registry.register(Box::new(v.clone())),
                };
                if let Err(err) = registered {
                    tracing::warn!(metric = desc.name, %err, "fail registering metric family");
                    continue;
                }
                entry.insert(family)
            }
        };

        let values: Vec<&str> = sample.label_values.iter().map(String::as_str).collect();
        match family {
            FamilyVec::Gauge(v) => match v.get_metric_with_label_values(&values) {
                Ok(metric) => metric.set(sample.value),
                Err(err) => tracing::warn!(metric = desc.name, %err, "dropping sample"),
            },
            FamilyVec::Counter(v) => {
                // counters reject negative and non-finite increments
                if sample.value.is_finite() && sample.value >= 0.0 {
                    match v.get_metric_with_label_values(&values) {
                        Ok(metric) => metric.inc_by(sample.value),
                        Err(err) => tracing::warn!(metric = desc.name, %err, "dropping sample"),
                    }
                } else {
                    tracing::debug!(
                        metric = desc.name,
                        value = sample.value,
                        "dropping non-countable counter sample"
                    );
                }
            }
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("fail encoding metrics")?;
    String::from_utf8(buffer).context("metrics output is not valid utf-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_merges_families() {
        let desc = MetricDesc::new("pg_q_v", "value", ValueKind::Gauge, &["d"]);
        let samples = vec![
            MetricSample::new(&desc, vec!["a".into()], 1.0),
            MetricSample::new(&desc, vec!["b".into()], 2.0),
        ];
        let text = render_text(&samples, &HashMap::new()).unwrap();
        assert_eq!(text.matches("# HELP pg_q_v").count(), 1);
        assert!(text.contains("pg_q_v{d=\"a\"} 1"));
        assert!(text.contains("pg_q_v{d=\"b\"} 2"));
    }

    #[test]
    fn test_render_applies_const_labels() {
        let desc = MetricDesc::new("pg_up", "up", ValueKind::Gauge, &[]);
        let samples = vec![MetricSample::new(&desc, vec![], 1.0)];
        let mut const_labels = HashMap::new();
        const_labels.insert("cluster".to_string(), "pg-test".to_string());
        let text = render_text(&samples, &const_labels).unwrap();
        assert!(text.contains("pg_up{cluster=\"pg-test\"} 1"));
    }

    #[test]
    fn test_render_counter_semantics() {
        let desc = MetricDesc::new("pg_q_c", "count", ValueKind::Counter, &[]);
        let samples = vec![MetricSample::new(&desc, vec![], 42.0)];
        let text = render_text(&samples, &HashMap::new()).unwrap();
        assert!(text.contains("pg_q_c 42"));
    }

    #[test]
    fn test_render_skips_negative_counter() {
        let desc = MetricDesc::new("pg_q_c", "count", ValueKind::Counter, &[]);
        let samples = vec![MetricSample::new(&desc, vec![], -1.0)];
        let text = render_text(&samples, &HashMap::new()).unwrap();
        assert!(!text.contains("pg_q_c -1"));
    }

    #[test]
    fn test_render_skips_label_cardinality_mismatch() {
        let desc_two = MetricDesc::new("pg_q_v", "value", ValueKind::Gauge, &["a", "b"]);
        let desc_one = MetricDesc::new("pg_q_v", "value", ValueKind::Gauge, &["a"]);
        let samples = vec![
            MetricSample::new(&desc_two, vec!["1".into(), "2".into()], 1.0),
            // same family name, wrong label count: dropped, not a panic
            MetricSample::new(&desc_one, vec!["1".into()], 1.0),
        ];
        let text = render_text(&samples, &HashMap::new()).unwrap();
        assert!(text.contains("pg_q_v{a=\"1\",b=\"2\"} 1"));
    }

    #[test]
    fn test_render_empty() {
        let text = render_text(&[], &HashMap::new()).unwrap();
        assert!(text.is_empty());
    }
}
