//! Process-wide `tracing` setup shared by the client library and the CLI.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "flow-studio.logs.jsonl";
const DEFAULT_FILTER: &str = "info";

/// Where log events go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Compact human-readable lines on stderr, leaving stdout to command output.
    Console,
    /// One JSON object per line, appended to a file.
    JsonFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// `EnvFilter` directive such as `info` or `flow_studio_client=debug`.
    pub filter: String,
    pub output: LogOutput,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: DEFAULT_FILTER.to_string(),
            output: LogOutput::Console,
        }
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

impl ObservabilityConfig {
    /// Read from the environment:
    /// - `FLOW_STUDIO_OBSERVABILITY`: `off`/`false`/`0` disables logging; unknown values keep it on.
    /// - `FLOW_STUDIO_LOG_LEVEL`, then `RUST_LOG`: filter directive.
    /// - `FLOW_STUDIO_JSON_LOG_PATH`: switch to JSONL output in that file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("FLOW_STUDIO_OBSERVABILITY")
            .and_then(|raw| parse_switch(&raw))
            .unwrap_or(true);
        let filter = ["FLOW_STUDIO_LOG_LEVEL", "RUST_LOG"]
            .into_iter()
            .filter_map(&lookup)
            .find(|directive| EnvFilter::try_new(directive).is_ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let output = lookup("FLOW_STUDIO_JSON_LOG_PATH")
            .filter(|raw| !raw.trim().is_empty())
            .map_or(LogOutput::Console, |raw| LogOutput::JsonFile(PathBuf::from(raw)));
        Self {
            enabled,
            filter,
            output,
        }
    }
}

/// Split a log path into the directory and file name `tracing-appender` expects.
fn split_log_path(path: &Path) -> (&Path, &str) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    (dir, file)
}

/// Install the subscriber described by `config`. Only the first call in a process has an effect.
pub fn init_observability_with(config: &ObservabilityConfig) {
    INIT.get_or_init(|| {
        if !config.enabled {
            return;
        }
        let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        match &config.output {
            LogOutput::JsonFile(path) => {
                let (dir, file) = split_log_path(path);
                let _ = std::fs::create_dir_all(dir);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(tracing_appender::rolling::never(dir, file));
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(json_layer)
                    .try_init();
            }
            LogOutput::Console => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

/// [`init_observability_with`] using [`ObservabilityConfig::from_env`].
pub fn init_observability() {
    init_observability_with(&ObservabilityConfig::from_env());
}
