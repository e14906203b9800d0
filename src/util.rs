//! Small parsing helpers shared by the CLI and the exporter.

use std::collections::HashMap;

/// Split a comma separated list, trimming whitespace and dropping empty items.
/// Returns an empty vector for an empty input.
#[must_use]
pub fn parse_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parse `k=v,k2=v2` constant labels. A `=` inside the value is preserved
/// (only the first one splits). Malformed pairs are dropped with a warning.
#[must_use]
pub fn parse_const_labels(s: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    if s.is_empty() {
        return labels;
    }
    for pair in s.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => {
                labels.insert(k.trim().to_string(), v.trim().to_string());
            }
            _ => {
                tracing::warn!(pair, "dropping malformed constant label");
            }
        }
    }
    labels
}
