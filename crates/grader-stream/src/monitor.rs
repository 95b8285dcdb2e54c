use tracing::info;

use crate::config::MonitorConfig;
use crate::driver::{AbortHandle, StreamDriver, StreamReport};
use crate::history::HistoryTable;
use crate::http::TransportOpener;
use crate::sink::EventSink;

/// Entry point for evaluation submissions.
///
/// Keeps the history table shared by all submissions and allows at most one
/// active stream: starting a new submission abandons the previous one.
pub struct BatchMonitor {
    config: MonitorConfig,
    history: HistoryTable,
    active: Option<AbortHandle>,
}

impl BatchMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_history(config, HistoryTable::new())
    }

    /// Creates a monitor appending to an existing table.
    pub fn with_history(config: MonitorConfig, history: HistoryTable) -> Self {
        Self {
            config,
            history,
            active: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Shared handle to the history table.
    pub fn history(&self) -> HistoryTable {
        self.history.clone()
    }

    /// Prepares a driver for a new submission with a fresh run context.
    ///
    /// Any previous stream is abandoned first; if its task is still running it
    /// stops at its next chunk boundary without touching its sink again.
    pub fn begin<S: EventSink>(&mut self, sink: S) -> StreamDriver<S> {
        self.abort_active();
        let (driver, handle) = StreamDriver::new(self.history.clone(), &self.config, sink);
        info!(submission_id = %driver.submission_id(), "starting evaluation submission");
        self.active = Some(handle);
        driver
    }

    /// Abandons the active stream, if any. Returns whether one was active.
    ///
    /// A stream whose driver has already finished is not active.
    pub fn abort_active(&mut self) -> bool {
        match self.active.take() {
            Some(handle) if !handle.is_aborted() && !handle.is_finished() => {
                info!("abandoning previous evaluation stream");
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Opens the request through `opener` and consumes the stream to its end.
    pub async fn submit<S: EventSink>(
        &mut self,
        opener: &dyn TransportOpener,
        body: String,
        sink: S,
    ) -> StreamReport {
        let driver = self.begin(sink);
        driver.submit(opener, body).await
    }
}
