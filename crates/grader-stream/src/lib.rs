//! Incremental consumer for streamed batch-evaluation progress.
//!
//! A grading server runs many model evaluations and reports on them through
//! one long-lived HTTP response: blank-line separated `data: {json}` frames
//! carrying progress labels, per-question results, run summaries, errors and
//! a final `done` marker. This crate splits that byte stream into frames,
//! decodes each frame into a typed event, reconciles the events into detail
//! sections and history rows, and reports everything to an `EventSink`.
//!
//! # Usage
//!
//! ```no_run
//! use grader_stream::prelude::*;
//!
//! struct Printer;
//!
//! impl EventSink for Printer {
//!     fn on_history_row(&mut self, row: &HistoryRow) {
//!         println!("{} {} {:?}", row.model, row.exam, row.grade);
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), MonitorError> {
//! let transport = HttpTransport::new(HttpTransportConfig::new(
//!     "http://localhost:8000/batch_evaluations/",
//! ))?;
//! let mut monitor = BatchMonitor::new(MonitorConfig::from_env()?);
//! let body = r#"{"exams[]":["1"],"models[]":["2"],"repetitions":1}"#.to_string();
//! let report = monitor.submit(&transport, body, Printer).await;
//! println!("{:?}", report.outcome);
//! # Ok(())
//! # }
//! ```

/// Consumer behaviour options.
pub mod config;
/// Read loop, abandonment handle and stream report.
pub mod driver;
/// Error types for transport, decoding and configuration.
pub mod errors;
/// Frame payload decoding into typed events.
pub mod event;
/// Byte stream framing.
pub mod frame;
/// Append-only table of finished runs.
pub mod history;
/// HTTP transport opener.
pub mod http;
/// Submission lifecycle and shared history.
pub mod monitor;
/// Process-wide tracing setup.
pub mod observability;
/// Common imports.
pub mod prelude;
/// Progress label grammar.
pub mod progress;
/// Rendering boundary the core reports to.
pub mod sink;
/// Run state machine.
pub mod tracker;

pub use config::{MonitorConfig, TotalSource};
pub use driver::{AbortHandle, ByteStream, StreamDriver, StreamOutcome, StreamReport, TransportResponse};
pub use errors::{DecodeError, MonitorError, ProtocolError, TransportError};
pub use event::{ItemResult, ItemResultEvent, ProgressEvent, StreamEvent, decode_frame};
pub use frame::{FrameSplitter, RawFrame};
pub use history::{HistoryRow, HistoryTable, RowStatus};
pub use http::{HttpTransport, HttpTransportConfig, TransportOpener};
pub use monitor::BatchMonitor;
pub use progress::{ProgressInfo, parse_progress_label, strip_emphasis};
pub use sink::{EventSink, ItemTally, NullSink, ProgressUpdate, StreamEnd};
pub use tracker::{RunContext, RunKey, RunState, RunTracker};
