use crate::catalog::get_config_path;
use crate::cli::actions::{Action, RunSettings};
use crate::pgurl::{process_pgurl, retrieve_pgurl};
use anyhow::Result;
use secrecy::SecretString;

/// True when the flag is set and not overridden by its hidden `--no-` twin.
fn bool_flag(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.get_flag(name) && !matches.get_flag(&format!("no-{name}"))
}

fn string_arg(matches: &clap::ArgMatches, name: &str) -> String {
    matches
        .get_one::<String>(name)
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Turn parsed arguments into the run action, resolving the target url and
/// config path through their precedence chains.
///
/// # Errors
///
/// Returns an error when the url file named by `PG_EXPORTER_URL_FILE` cannot
/// be read.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let url = retrieve_pgurl(matches.get_one::<String>("url").map(String::as_str))?;
    let url = process_pgurl(&url);

    let mut metric_path = string_arg(matches, "metric-path");
    if !metric_path.starts_with('/') {
        metric_path.insert(0, '/');
    }

    Ok(Action::Run(Box::new(RunSettings {
        url: SecretString::from(url),
        config: get_config_path(matches.get_one::<String>("config").map(String::as_str)),
        port: matches.get_one::<u16>("port").copied().unwrap_or(9630),
        metric_path,
        const_labels: string_arg(matches, "label"),
        tags: string_arg(matches, "tag"),
        namespace: string_arg(matches, "namespace"),
        exclude_database: string_arg(matches, "exclude-database"),
        include_database: string_arg(matches, "include-database"),
        connect_timeout: matches.get_one::<u64>("connect-timeout").copied().unwrap_or(100),
        disable_cache: bool_flag(matches, "disable-cache"),
        disable_intro: bool_flag(matches, "disable-intro"),
        auto_discovery: bool_flag(matches, "auto-discovery"),
        fail_fast: bool_flag(matches, "fail-fast"),
        dry_run: bool_flag(matches, "dry-run"),
        explain: bool_flag(matches, "explain"),
    })))
}
