use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "minutes.logs.jsonl";

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogTarget {
    Disabled,
    /// Compact human-readable lines on stderr; stdout stays free for CLI output.
    Console,
    JsonFile(PathBuf),
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn resolve_target(lookup: impl Fn(&str) -> Option<String>) -> LogTarget {
    let enabled = ["MINUTES_OBSERVABILITY_ENABLED", "MINUTES_OBSERVABILITY"]
        .iter()
        .find_map(|key| lookup(key))
        .map(|value| parse_bool_env(&value).unwrap_or(true))
        .unwrap_or(true);
    if !enabled {
        return LogTarget::Disabled;
    }
    match lookup("MINUTES_JSON_LOG_PATH").filter(|p| !p.trim().is_empty()) {
        Some(path) => LogTarget::JsonFile(PathBuf::from(path)),
        None => LogTarget::Console,
    }
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("MINUTES_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `MINUTES_OBSERVABILITY_ENABLED` / `MINUTES_OBSERVABILITY`: optional enable/disable flag (default enabled).
/// - `MINUTES_LOG_LEVEL`: optional level/filter override (`info`, `debug`, etc.).
/// - `MINUTES_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file,
///   otherwise they go to stderr.
/// - `RUST_LOG`: optional filter override.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let target = resolve_target(|key| std::env::var(key).ok());
        let env_filter = resolve_env_filter();
        match target {
            LogTarget::Disabled => {}
            LogTarget::JsonFile(path) => {
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let _ = std::fs::create_dir_all(dir);
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_LOG_FILE);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            LogTarget::Console => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
