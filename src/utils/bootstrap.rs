//! Bootstrap utilities for braid binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the `BRAID_LOG` environment variable.
///
/// Defaults to "info" level if `BRAID_LOG` is not set. Logs go to stderr.
/// Calling this twice is harmless: the second install is ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Value of a `--config <path>` or `--config=<path>` command-line argument.
pub fn parse_config_path() -> Option<String> {
    config_path_from(std::env::args().skip(1))
}

fn config_path_from(args: impl IntoIterator<Item = String>) -> Option<String> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

/// Command-line arguments that are not `--config` or its value.
pub fn positional_args() -> Vec<String> {
    positional_from(std::env::args().skip(1))
}

fn positional_from(args: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut positional = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            args.next();
        } else if !arg.starts_with("--config=") {
            positional.push(arg);
        }
    }
    positional
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_path_forms() {
        assert_eq!(
            config_path_from(args(&["feed.json", "--config", "braid.yaml"])),
            Some("braid.yaml".to_string())
        );
        assert_eq!(
            config_path_from(args(&["--config=prod.yaml"])),
            Some("prod.yaml".to_string())
        );
        assert_eq!(config_path_from(args(&["feed.json"])), None);
    }

    #[test]
    fn test_positional_args_skip_config() {
        assert_eq!(
            positional_from(args(&["--config", "braid.yaml", "feed.json"])),
            vec!["feed.json".to_string()]
        );
        assert_eq!(
            positional_from(args(&["feed.json", "--config=x.yaml"])),
            vec!["feed.json".to_string()]
        );
    }
}
