//! Boolean flags are presence flags and reject `--flag=value` forms, which
//! leads to confusing parse errors. This pass rewrites `--flag=false` into
//! `--no-flag` (and `--flag=true` into `--flag`) for the known boolean
//! flags; everything else passes through untouched.

/// Boolean flags of the CLI, with their short form when one exists.
pub const BOOL_FLAGS: &[(&str, Option<char>)] = &[
    ("disable-cache", Some('C')),
    ("disable-intro", Some('m')),
    ("auto-discovery", Some('a')),
    ("fail-fast", Some('f')),
    ("dry-run", Some('D')),
    ("explain", Some('E')),
];

/// The long name of a boolean flag, resolving a short form.
fn bool_flag_name(name: &str) -> Option<&'static str> {
    if name.len() == 1 {
        let short = name.chars().next()?;
        BOOL_FLAGS
            .iter()
            .find(|(_, s)| *s == Some(short))
            .map(|(long, _)| *long)
    } else {
        BOOL_FLAGS
            .iter()
            .find(|(long, _)| *long == name)
            .map(|(long, _)| *long)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Rewrite `--flag=bool` / `-f=bool` arguments for known boolean flags.
#[must_use]
pub fn normalize_bool_equals_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out = Vec::new();
    for arg in args {
        if let Some(rest) = arg.strip_prefix("--") {
            if let Some((name, value)) = rest.split_once('=')
                && let Some(long) = bool_flag_name(name)
                && let Some(enabled) = parse_bool(value)
            {
                out.push(if enabled {
                    format!("--{long}")
                } else {
                    format!("--no-{long}")
                });
                continue;
            }
            out.push(arg);
        } else if let Some(rest) = arg.strip_prefix('-') {
            if let Some((name, value)) = rest.split_once('=')
                && name.len() == 1
                && let Some(long) = bool_flag_name(name)
                && let Some(enabled) = parse_bool(value)
            {
                out.push(if enabled {
                    format!("-{name}")
                } else {
                    format!("--no-{long}")
                });
                continue;
            }
            out.push(arg);
        } else {
            out.push(arg);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(args: &[&str]) -> Vec<String> {
        normalize_bool_equals_args(args.iter().map(ToString::to_string))
    }

    #[test]
    fn test_rewrites_false_to_no_flag() {
        assert_eq!(normalize(&["--auto-discovery=false"]), vec!["--no-auto-discovery"]);
        assert_eq!(normalize(&["--fail-fast=0"]), vec!["--no-fail-fast"]);
    }

    #[test]
    fn test_rewrites_true_to_plain_flag() {
        assert_eq!(normalize(&["--auto-discovery=true"]), vec!["--auto-discovery"]);
        assert_eq!(normalize(&["--dry-run=1"]), vec!["--dry-run"]);
    }

    #[test]
    fn test_short_form() {
        assert_eq!(normalize(&["-a=false"]), vec!["--no-auto-discovery"]);
        assert_eq!(normalize(&["-a=true"]), vec!["-a"]);
    }

    #[test]
    fn test_unknown_flags_pass_through() {
        assert_eq!(normalize(&["--unknown=false"]), vec!["--unknown=false"]);
        assert_eq!(normalize(&["--url=x"]), vec!["--url=x"]);
        assert_eq!(normalize(&["positional"]), vec!["positional"]);
    }

    #[test]
    fn test_non_bool_values_pass_through() {
        assert_eq!(normalize(&["--auto-discovery=maybe"]), vec!["--auto-discovery=maybe"]);
    }

    #[test]
    fn test_mixed_argv() {
        assert_eq!(
            normalize(&["pg_exporter", "--url", "postgres:///", "--auto-discovery=false"]),
            vec!["pg_exporter", "--url", "postgres:///", "--no-auto-discovery"]
        );
    }
}
