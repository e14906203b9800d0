//! The query catalog: YAML query definitions parsed into an in-memory map
//! keyed by branch name, validated against Prometheus naming rules.

mod column;
mod load;
mod query;
pub mod validate;

pub use column::{Column, ColumnUsage};
pub use load::{
    Catalog, finalize_queries, get_config_path, load_config, parse_config, parse_query,
};
pub use query::{PredicateQuery, Query};
