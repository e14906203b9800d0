//! PostgreSQL / PgBouncer metrics exporter for Prometheus, driven by a
//! declarative YAML query catalog.
//!
//! The library is organized around four layers:
//!
//! - [`catalog`] parses and validates the YAML query catalog
//! - [`scrape`] executes catalog queries against one server, with caching,
//!   predicate gates and compatibility planning
//! - [`exporter`] aggregates the primary server with auto-discovered
//!   peripheral databases and serves the HTTP surface
//! - [`cli`] is the command-line front end

pub mod catalog;
pub mod cli;
pub mod exporter;
pub mod pgurl;
pub mod scrape;
pub mod util;
