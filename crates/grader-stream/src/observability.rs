//! Process-wide log subscriber for stream consumers.
//!
//! Every stream logs under an `evaluation_stream` span carrying its
//! `submission_id`. The JSON output flattens event fields and nests that span,
//! so one submission can be picked out of a shared log file.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "grader-stream.jsonl";

/// Where log lines are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOutput {
    /// Compact lines on stderr. Stdout is left to the rendered stream.
    Stderr,
    /// JSON lines appended to a file.
    JsonFile(PathBuf),
}

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// `EnvFilter` directives.
    pub filter: String,
    pub output: LogOutput,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves settings through `lookup`.
    ///
    /// - `GRADER_OBSERVABILITY_ENABLED`: on/off flag, default on.
    /// - `GRADER_LOG_LEVEL`: filter directives; ignored when they do not parse.
    /// - `RUST_LOG`: fallback filter, then `info`.
    /// - `GRADER_JSON_LOG_PATH`: write JSON lines to this file instead of stderr.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("GRADER_OBSERVABILITY_ENABLED")
            .and_then(|value| parse_flag(&value))
            .unwrap_or(true);
        let filter = ["GRADER_LOG_LEVEL", "RUST_LOG"]
            .into_iter()
            .filter_map(&lookup)
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty() && EnvFilter::try_new(value).is_ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let output = match lookup("GRADER_JSON_LOG_PATH") {
            Some(path) if !path.trim().is_empty() => LogOutput::JsonFile(PathBuf::from(path.trim())),
            _ => LogOutput::Stderr,
        };
        Self {
            enabled,
            filter,
            output,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

pub(crate) type JsonLayer<S, W> = tracing_subscriber::fmt::Layer<S, JsonFields, Format<Json>, W>;

/// JSON-lines layer: event fields at top level, the stream span under `span`.
pub(crate) fn json_layer<S, W>(writer: W) -> JsonLayer<S, W>
where
    W: for<'w> MakeWriter<'w> + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_target(false)
        .with_writer(writer)
}

fn file_writer(path: &Path) -> Result<RollingFileAppender, String> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| e.to_string())
}

fn install(settings: &LogSettings) {
    if !settings.enabled {
        return;
    }
    let filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = match &settings.output {
        LogOutput::JsonFile(path) => match file_writer(path) {
            Ok(writer) => Some(json_layer(writer)),
            Err(err) => {
                eprintln!("cannot open log file {}: {err}; logging to stderr", path.display());
                None
            }
        },
        LogOutput::Stderr => None,
    };
    let console = json.is_none().then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(console)
        .try_init();
}

/// Installs the process-wide log subscriber once, from [`LogSettings::from_env`].
pub fn init_observability() {
    INIT.get_or_init(|| install(&LogSettings::from_env()));
}
