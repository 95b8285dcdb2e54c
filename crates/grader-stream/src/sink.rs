//! Boundary between the stream core and whatever renders it.
//!
//! The core only calls into an `EventSink`; it never reads back from it.

use crate::event::ItemResult;
use crate::history::HistoryRow;
use crate::progress::{ProgressInfo, percent_of};
use crate::tracker::RunKey;

/// Progress shown to the user.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProgressUpdate<'a> {
    /// A batch label that followed the progress grammar.
    Parsed(&'a ProgressInfo),
    /// A label that did not parse; display it verbatim.
    Raw(&'a str),
    /// Question counters of the exam in progress.
    Fraction { processed: u32, total: u32 },
}

impl ProgressUpdate<'_> {
    /// Completion percentage, when the update carries counters.
    pub fn percent(&self) -> Option<u8> {
        match self {
            Self::Parsed(info) => Some(info.percent()),
            Self::Raw(_) => None,
            Self::Fraction { processed, total } => Some(percent_of(*processed, *total)),
        }
    }
}

/// Counters reported when the last question of an exam has been graded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ItemTally {
    pub answered: u32,
    pub total: u32,
    pub correct_count: Option<u32>,
    pub total_time: Option<f64>,
}

/// How a stream ended. Exactly one is reported per stream that was not abandoned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server closed the body normally.
    Closed,
    /// The transport failed; earlier output stays valid.
    ConnectionError { message: String },
    /// The server refused the request before streaming began.
    Rejected { status: u16 },
}

/// Rendering collaborator driven by the run tracker and stream driver.
///
/// Every method has an empty default so sinks implement only what they show.
pub trait EventSink {
    /// An application error sent by the server.
    fn on_error(&mut self, _message: &str) {}

    fn on_progress(&mut self, _update: ProgressUpdate<'_>) {}

    /// A new detail section begins for `key`.
    fn on_section_open(&mut self, _key: &RunKey, _context: &ProgressInfo) {}

    /// A graded question for the section identified by `key`, if one is open.
    fn on_item_result(
        &mut self,
        _key: Option<&RunKey>,
        _index: Option<u32>,
        _result: &ItemResult,
        _elapsed_seconds: Option<f64>,
    ) {
    }

    /// The last question of the current exam was graded.
    fn on_section_items_complete(&mut self, _key: Option<&RunKey>, _tally: ItemTally) {}

    /// Aggregate grade for the section being closed.
    ///
    /// `grade` is the numeric value; `grade_label` is the text the server sent,
    /// such as `7.5 (3/4)`.
    fn on_section_summary(
        &mut self,
        _key: Option<&RunKey>,
        _grade: f64,
        _grade_label: &str,
        _elapsed_seconds: f64,
    ) {
    }

    fn on_history_row(&mut self, _row: &HistoryRow) {}

    /// The server reported the whole batch as finished.
    fn on_batch_finished(&mut self) {}

    fn on_stream_end(&mut self, _end: &StreamEnd) {}
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn on_error(&mut self, message: &str) {
        (**self).on_error(message)
    }

    fn on_progress(&mut self, update: ProgressUpdate<'_>) {
        (**self).on_progress(update)
    }

    fn on_section_open(&mut self, key: &RunKey, context: &ProgressInfo) {
        (**self).on_section_open(key, context)
    }

    fn on_item_result(
        &mut self,
        key: Option<&RunKey>,
        index: Option<u32>,
        result: &ItemResult,
        elapsed_seconds: Option<f64>,
    ) {
        (**self).on_item_result(key, index, result, elapsed_seconds)
    }

    fn on_section_items_complete(&mut self, key: Option<&RunKey>, tally: ItemTally) {
        (**self).on_section_items_complete(key, tally)
    }

    fn on_section_summary(
        &mut self,
        key: Option<&RunKey>,
        grade: f64,
        grade_label: &str,
        elapsed_seconds: f64,
    ) {
        (**self).on_section_summary(key, grade, grade_label, elapsed_seconds)
    }

    fn on_history_row(&mut self, row: &HistoryRow) {
        (**self).on_history_row(row)
    }

    fn on_batch_finished(&mut self) {
        (**self).on_batch_finished()
    }

    fn on_stream_end(&mut self, end: &StreamEnd) {
        (**self).on_stream_end(end)
    }
}

/// Sink that ignores every call.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Owned copy of one sink call.
    #[derive(Clone, Debug, PartialEq)]
    pub(crate) enum SinkCall {
        Error(String),
        ProgressParsed(ProgressInfo),
        ProgressRaw(String),
        ProgressFraction(u32, u32),
        SectionOpen(RunKey),
        Item {
            key: Option<RunKey>,
            index: Option<u32>,
            is_correct: bool,
        },
        ItemsComplete(Option<RunKey>, ItemTally),
        Summary(Option<RunKey>, f64, String),
        History(HistoryRow),
        BatchFinished,
        End(StreamEnd),
    }

    /// Records calls into a shared log so tests can inspect a sink that was moved.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        calls: Arc<Mutex<Vec<SinkCall>>>,
    }

    impl RecordingSink {
        pub(crate) fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().expect("sink log").clone()
        }

        fn push(&self, call: SinkCall) {
            self.calls.lock().expect("sink log").push(call);
        }
    }

    impl EventSink for RecordingSink {
        fn on_error(&mut self, message: &str) {
            self.push(SinkCall::Error(message.to_string()));
        }

        fn on_progress(&mut self, update: ProgressUpdate<'_>) {
            self.push(match update {
                ProgressUpdate::Parsed(info) => SinkCall::ProgressParsed(info.clone()),
                ProgressUpdate::Raw(text) => SinkCall::ProgressRaw(text.to_string()),
                ProgressUpdate::Fraction { processed, total } => {
                    SinkCall::ProgressFraction(processed, total)
                }
            });
        }

        fn on_section_open(&mut self, key: &RunKey, _context: &ProgressInfo) {
            self.push(SinkCall::SectionOpen(key.clone()));
        }

        fn on_item_result(
            &mut self,
            key: Option<&RunKey>,
            index: Option<u32>,
            result: &ItemResult,
            _elapsed_seconds: Option<f64>,
        ) {
            self.push(SinkCall::Item {
                key: key.cloned(),
                index,
                is_correct: result.is_correct,
            });
        }

        fn on_section_items_complete(&mut self, key: Option<&RunKey>, tally: ItemTally) {
            self.push(SinkCall::ItemsComplete(key.cloned(), tally));
        }

        fn on_section_summary(
            &mut self,
            key: Option<&RunKey>,
            grade: f64,
            grade_label: &str,
            _elapsed: f64,
        ) {
            self.push(SinkCall::Summary(key.cloned(), grade, grade_label.to_string()));
        }

        fn on_history_row(&mut self, row: &HistoryRow) {
            self.push(SinkCall::History(row.clone()));
        }

        fn on_batch_finished(&mut self) {
            self.push(SinkCall::BatchFinished);
        }

        fn on_stream_end(&mut self, end: &StreamEnd) {
            self.push(SinkCall::End(end.clone()));
        }
    }
}
