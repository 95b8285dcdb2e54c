use std::str::FromStr;
use std::time::Duration;

use crate::errors::MonitorError;

/// Where the "last question of the exam" check reads the question total from.
///
/// Items may embed their own `total_questions`; the stream may also carry a
/// bare counters update. Either source can be preferred; the other is the
/// fallback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TotalSource {
    /// Prefer the total embedded in the item, then the stream counter.
    #[default]
    ItemFirst,
    /// Prefer the latest stream counter, then the item total.
    StreamFirst,
}

impl TotalSource {
    pub(crate) fn resolve(self, item_total: Option<u32>, stream_total: Option<u32>) -> Option<u32> {
        match self {
            Self::ItemFirst => item_total.or(stream_total),
            Self::StreamFirst => stream_total.or(item_total),
        }
    }
}

impl FromStr for TotalSource {
    type Err = MonitorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "item" | "item_first" => Ok(Self::ItemFirst),
            "stream" | "stream_first" => Ok(Self::StreamFirst),
            other => Err(MonitorError::Config(format!(
                "unknown total source `{other}` (expected item_first or stream_first)"
            ))),
        }
    }
}

/// Behaviour of a stream consumer.
#[derive(Clone, Debug, Default)]
pub struct MonitorConfig {
    /// Question-total precedence for closing markers.
    pub total_source: TotalSource,
    /// Abort the stream when no chunk arrives for this long.
    ///
    /// Disabled by default; batch jobs may legitimately stay silent for a
    /// long time while a model loads.
    pub idle_timeout: Option<Duration>,
}

impl MonitorConfig {
    /// Builds a config from `GRADER_STREAM_TOTAL_SOURCE` and
    /// `GRADER_STREAM_IDLE_TIMEOUT_SECS`, falling back to defaults for unset
    /// variables.
    pub fn from_env() -> Result<Self, MonitorError> {
        let mut config = Self::default();
        if let Some(raw) = non_empty_env("GRADER_STREAM_TOTAL_SOURCE") {
            config.total_source = raw.parse()?;
        }
        if let Some(raw) = non_empty_env("GRADER_STREAM_IDLE_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|e| {
                MonitorError::Config(format!("invalid GRADER_STREAM_IDLE_TIMEOUT_SECS `{raw}`: {e}"))
            })?;
            config = config.idle_timeout(Duration::from_secs(secs))?;
        }
        Ok(config)
    }

    /// Overrides the question-total precedence.
    pub fn total_source(mut self, source: TotalSource) -> Self {
        self.total_source = source;
        self
    }

    /// Enables the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Result<Self, MonitorError> {
        if timeout.is_zero() {
            return Err(MonitorError::Config(
                "idle timeout must be greater than 0".into(),
            ));
        }
        self.idle_timeout = Some(timeout);
        Ok(self)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
