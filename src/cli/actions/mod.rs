pub mod run;

use secrecy::SecretString;
use std::path::PathBuf;

/// Everything the run action needs, resolved from CLI flags, environment
/// variables and defaults.
#[derive(Debug)]
pub struct RunSettings {
    pub url: SecretString,
    pub config: Option<PathBuf>,
    pub port: u16,
    pub metric_path: String,
    pub const_labels: String,
    pub tags: String,
    pub namespace: String,
    pub exclude_database: String,
    pub include_database: String,
    pub connect_timeout: u64,
    pub disable_cache: bool,
    pub disable_intro: bool,
    pub auto_discovery: bool,
    pub fail_fast: bool,
    pub dry_run: bool,
    pub explain: bool,
}

#[derive(Debug)]
pub enum Action {
    Run(Box<RunSettings>),
}
