//! Common imports for typical stream consumers.
pub use crate::{
    AbortHandle, BatchMonitor, EventSink, HistoryRow, HistoryTable, HttpTransport,
    HttpTransportConfig, ItemResult, ItemTally, MonitorConfig, MonitorError, ProgressInfo,
    ProgressUpdate, RowStatus, RunKey, StreamEnd, StreamOutcome, StreamReport, TotalSource,
    TransportResponse,
};
