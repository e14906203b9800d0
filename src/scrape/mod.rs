//! The scrape engine: per-server planning of catalog queries into
//! collectors, execution with caching and predicate gates, and the sample
//! model that turns result rows into Prometheus series.

pub mod cast;
pub mod collector;
pub mod probe;
pub mod sample;
pub mod server;

pub use collector::{CollectOutcome, Collector};
pub use probe::{ProbeResult, ProbeTarget};
pub use sample::{MetricDesc, MetricSample, ValueKind, render_text};
pub use server::{Server, ServerOpts, parse_semver};
