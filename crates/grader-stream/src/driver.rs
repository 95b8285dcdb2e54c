use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::config::MonitorConfig;
use crate::errors::TransportError;
use crate::event::decode_frame;
use crate::frame::FrameSplitter;
use crate::history::HistoryTable;
use crate::http::TransportOpener;
use crate::sink::{EventSink, StreamEnd};
use crate::tracker::{RunState, RunTracker};

/// Body chunks of an opened streaming response.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, TransportError>> + Send + 'static>>;

/// An opened streaming response: status line plus body chunks.
pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl TransportResponse {
    pub fn new(
        status: u16,
        body: impl futures::Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    ) -> Self {
        Self {
            status,
            body: Box::pin(body),
        }
    }

    /// A `200 OK` response over `body`.
    pub fn ok(
        body: impl futures::Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    ) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Handle used to abandon a running stream.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests abandonment.
    ///
    /// The driver stops at its next chunk boundary (or immediately while
    /// waiting for one) and makes no further sink calls.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Whether the driver this handle controls has been dropped, either
    /// because its stream ended or because it was never run.
    pub fn is_finished(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Why a stream stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    Closed,
    ConnectionError(TransportError),
    Rejected { status: u16 },
    /// Superseded by a newer submission or aborted by the caller.
    Abandoned,
}

/// Counters and outcome of one consumed stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamReport {
    pub submission_id: uuid::Uuid,
    pub outcome: StreamOutcome,
    pub chunks: u64,
    pub frames: u64,
    pub events: u64,
    pub skipped_frames: u64,
    pub history_rows: usize,
    /// Bytes of an unterminated frame dropped at end of stream.
    pub discarded_bytes: usize,
    /// Tracker state when the stream stopped.
    pub final_state: RunState,
}

/// Drives one stream: reads chunks, splits frames, decodes events and
/// applies them to a fresh run tracker.
///
/// Each chunk read is the only suspension point; all frames of a chunk are
/// processed before the next read.
pub struct StreamDriver<S> {
    submission_id: uuid::Uuid,
    splitter: FrameSplitter,
    tracker: RunTracker,
    sink: S,
    abort_rx: watch::Receiver<bool>,
    idle_timeout: Option<Duration>,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    chunks: u64,
    frames: u64,
    events: u64,
    skipped_frames: u64,
    discarded_bytes: usize,
}

enum Step {
    AbortSignalled,
    AbortHandleDropped,
    Read(Result<Option<Bytes>, TransportError>),
}

impl<S: EventSink> StreamDriver<S> {
    /// Creates a driver appending to `history` and returns its abort handle.
    pub fn new(history: HistoryTable, config: &MonitorConfig, sink: S) -> (Self, AbortHandle) {
        let (abort_tx, abort_rx) = watch::channel(false);
        let driver = Self {
            submission_id: uuid::Uuid::new_v4(),
            splitter: FrameSplitter::default(),
            tracker: RunTracker::new(history, config.total_source),
            sink,
            abort_rx,
            idle_timeout: config.idle_timeout,
            counters: Counters::default(),
        };
        (driver, AbortHandle { tx: abort_tx })
    }

    pub fn submission_id(&self) -> uuid::Uuid {
        self.submission_id
    }

    /// Opens the transport with `opener` and consumes it.
    ///
    /// A failure to open is reported to the sink as a connection error.
    pub async fn submit(self, opener: &dyn TransportOpener, body: String) -> StreamReport {
        let span = self.span();
        self.open_and_read(opener, body).instrument(span).await
    }

    /// Consumes `transport` until it ends, fails, or is abandoned.
    pub async fn consume(self, transport: TransportResponse) -> StreamReport {
        let span = self.span();
        self.read(transport).instrument(span).await
    }

    /// Span every log line of this stream is recorded under.
    fn span(&self) -> tracing::Span {
        info_span!("evaluation_stream", submission_id = %self.submission_id)
    }

    async fn open_and_read(mut self, opener: &dyn TransportOpener, body: String) -> StreamReport {
        debug!(bytes = body.len(), "opening evaluation stream");
        match opener.open(body).await {
            Ok(transport) => self.read(transport).await,
            Err(err) => {
                if self.aborted() {
                    return self.abandon();
                }
                warn!(error = %err, "failed to open evaluation stream");
                self.sink.on_stream_end(&StreamEnd::ConnectionError {
                    message: err.to_string(),
                });
                self.into_report(StreamOutcome::ConnectionError(err))
            }
        }
    }

    async fn read(mut self, transport: TransportResponse) -> StreamReport {
        if self.aborted() {
            return self.abandon();
        }
        if !transport.is_success() {
            let status = transport.status;
            warn!(status, "evaluation request rejected; not reading the body");
            self.sink.on_stream_end(&StreamEnd::Rejected { status });
            return self.into_report(StreamOutcome::Rejected { status });
        }

        info!("consuming evaluation stream");
        let mut body = transport.body;
        let idle_timeout = self.idle_timeout;
        let mut abort_live = true;
        loop {
            let step = tokio::select! {
                biased;
                changed = self.abort_rx.changed(), if abort_live => match changed {
                    Ok(()) => Step::AbortSignalled,
                    Err(_) => Step::AbortHandleDropped,
                },
                next = read_chunk(&mut body, idle_timeout) => Step::Read(next),
            };

            match step {
                Step::AbortSignalled | Step::AbortHandleDropped if self.aborted() => {
                    return self.abandon();
                }
                Step::AbortSignalled => {}
                Step::AbortHandleDropped => abort_live = false,
                Step::Read(Ok(Some(chunk))) => {
                    if self.aborted() {
                        return self.abandon();
                    }
                    self.feed(&chunk);
                }
                Step::Read(Ok(None)) => {
                    self.counters.discarded_bytes = self.splitter.finish();
                    info!(
                        frames = self.counters.frames,
                        events = self.counters.events,
                        skipped = self.counters.skipped_frames,
                        elapsed_ms = self.tracker.context().elapsed_millis(),
                        "evaluation stream closed"
                    );
                    self.sink.on_stream_end(&StreamEnd::Closed);
                    return self.into_report(StreamOutcome::Closed);
                }
                Step::Read(Err(err)) => {
                    warn!(
                        error = %err,
                        elapsed_ms = self.tracker.context().elapsed_millis(),
                        "evaluation stream failed"
                    );
                    self.sink.on_stream_end(&StreamEnd::ConnectionError {
                        message: err.to_string(),
                    });
                    return self.into_report(StreamOutcome::ConnectionError(err));
                }
            }
        }
    }

    fn feed(&mut self, chunk: &[u8]) {
        self.counters.chunks += 1;
        for frame in self.splitter.push_chunk(chunk) {
            self.counters.frames += 1;
            match decode_frame(&frame) {
                Ok(event) => {
                    self.counters.events += 1;
                    self.tracker.apply(event, &mut self.sink);
                }
                Err(err) => {
                    self.counters.skipped_frames += 1;
                    warn!(
                        error = %err,
                        frame = %preview(&frame),
                        "skipping undecodable frame"
                    );
                }
            }
        }
    }

    fn aborted(&self) -> bool {
        *self.abort_rx.borrow()
    }

    fn abandon(self) -> StreamReport {
        info!(
            elapsed_ms = self.tracker.context().elapsed_millis(),
            "evaluation stream abandoned"
        );
        self.into_report(StreamOutcome::Abandoned)
    }

    fn into_report(self, outcome: StreamOutcome) -> StreamReport {
        StreamReport {
            submission_id: self.submission_id,
            outcome,
            chunks: self.counters.chunks,
            frames: self.counters.frames,
            events: self.counters.events,
            skipped_frames: self.counters.skipped_frames,
            history_rows: self.tracker.rows_appended(),
            discarded_bytes: self.counters.discarded_bytes,
            final_state: self.tracker.state(),
        }
    }
}

async fn read_chunk(
    body: &mut ByteStream,
    idle_timeout: Option<Duration>,
) -> Result<Option<Bytes>, TransportError> {
    let next = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, body.next())
            .await
            .map_err(|_| TransportError::IdleTimeout {
                seconds: limit.as_secs(),
            })?,
        None => body.next().await,
    };
    next.transpose()
}

fn preview(frame: &str) -> String {
    const MAX_CHARS: usize = 120;
    let mut out: String = frame.chars().take(MAX_CHARS).collect();
    if frame.chars().nth(MAX_CHARS).is_some() {
        out.push_str("...");
    }
    out
}
