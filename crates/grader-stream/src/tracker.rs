use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TotalSource;
use crate::errors::ProtocolError;
use crate::event::{ItemResultEvent, ProgressEvent, StreamEvent};
use crate::history::{HistoryRow, HistoryTable};
use crate::progress::ProgressInfo;
use crate::sink::{EventSink, ItemTally, ProgressUpdate};

/// Identifies the detail section item results belong to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub subject: String,
    pub exam: String,
}

impl From<&ProgressInfo> for RunKey {
    fn from(info: &ProgressInfo) -> Self {
        Self {
            subject: info.subject_name.clone(),
            exam: info.exam_name.clone(),
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.subject, self.exam)
    }
}

/// Lifecycle of one stream's run reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// No progress seen yet.
    Idle,
    /// A progress event was seen.
    InProgress,
    /// Item results arrived for the open section; its summary is pending.
    AwaitingSummary,
    /// The server reported the batch as finished.
    Done,
}

/// Mutable state owned by one tracker for the lifetime of one stream.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub last_progress: Option<ProgressInfo>,
    pub current_run_key: Option<RunKey>,
    pub started_at_millis: i64,
    /// Latest question total from a bare counters update.
    pub stream_total: Option<u32>,
    pub state: RunState,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            last_progress: None,
            current_run_key: None,
            started_at_millis: Utc::now().timestamp_millis(),
            stream_total: None,
            state: RunState::Idle,
        }
    }

    /// Milliseconds since the stream started, never negative.
    pub fn elapsed_millis(&self) -> i64 {
        (Utc::now().timestamp_millis() - self.started_at_millis).max(0)
    }

    fn advance(&mut self, next: RunState) {
        if self.state != RunState::Done {
            self.state = next;
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Correlates decoded events into sections and history rows.
///
/// Item results always belong to the section opened by the most recent
/// parsed progress label. A run summary or an application error closes that
/// section and appends exactly one history row built from the last progress
/// seen.
pub struct RunTracker {
    context: RunContext,
    history: HistoryTable,
    total_source: TotalSource,
    rows_appended: usize,
}

impl RunTracker {
    /// Creates a tracker with a fresh context appending into `history`.
    pub fn new(history: HistoryTable, total_source: TotalSource) -> Self {
        Self {
            context: RunContext::new(),
            history,
            total_source,
            rows_appended: 0,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn state(&self) -> RunState {
        self.context.state
    }

    pub fn history(&self) -> &HistoryTable {
        &self.history
    }

    /// Rows this tracker added to the shared table.
    pub fn rows_appended(&self) -> usize {
        self.rows_appended
    }

    /// Applies one event, forwarding the visible effects to `sink`.
    pub fn apply<S: EventSink + ?Sized>(&mut self, event: StreamEvent, sink: &mut S) {
        debug!(kind = event.kind(), state = ?self.context.state, "applying stream event");
        match event {
            StreamEvent::Progress(ProgressEvent::Label { raw, parsed }) => {
                self.context.advance(RunState::InProgress);
                match parsed {
                    Some(info) => self.on_parsed_progress(info, sink),
                    None => {
                        let err = ProtocolError::UnparsableProgressLabel { label: raw.clone() };
                        debug!(error = %err, "showing progress label verbatim");
                        sink.on_progress(ProgressUpdate::Raw(&raw));
                    }
                }
            }
            StreamEvent::Progress(ProgressEvent::Counters { processed, total }) => {
                self.context.advance(RunState::InProgress);
                self.context.stream_total = Some(total);
                sink.on_progress(ProgressUpdate::Fraction { processed, total });
            }
            StreamEvent::ItemResult(item) => self.on_item(item, sink),
            StreamEvent::RunSummary {
                grade,
                grade_label,
                elapsed_seconds,
            } => {
                let key = self.close_section();
                sink.on_section_summary(key.as_ref(), grade, &grade_label, elapsed_seconds);
                let row = HistoryRow::summary(
                    self.context.last_progress.as_ref(),
                    grade,
                    &grade_label,
                    elapsed_seconds,
                );
                self.append_row(row, sink);
            }
            StreamEvent::Error { message } => {
                warn!(%message, section = ?self.context.current_run_key, "server reported an evaluation error");
                sink.on_error(&message);
                self.close_section();
                let row = HistoryRow::failure(self.context.last_progress.as_ref(), &message);
                self.append_row(row, sink);
            }
            StreamEvent::Completion => {
                self.context.state = RunState::Done;
                sink.on_batch_finished();
            }
        }
    }

    fn on_parsed_progress<S: EventSink + ?Sized>(&mut self, info: ProgressInfo, sink: &mut S) {
        sink.on_progress(ProgressUpdate::Parsed(&info));
        let key = RunKey::from(&info);
        if self.context.current_run_key.as_ref() != Some(&key) {
            if self.context.state == RunState::Done {
                debug!(section = %key, "batch already finished; not opening a new section");
            } else {
                sink.on_section_open(&key, &info);
                self.context.current_run_key = Some(key);
                self.context.stream_total = None;
            }
        }
        self.context.last_progress = Some(info);
    }

    fn on_item<S: EventSink + ?Sized>(&mut self, item: ItemResultEvent, sink: &mut S) {
        self.context.advance(RunState::AwaitingSummary);
        let key = self.context.current_run_key.as_ref();
        sink.on_item_result(key, item.index, &item.result, item.elapsed_seconds);

        let total = self
            .total_source
            .resolve(item.total, self.context.stream_total);
        match (item.index, total) {
            (Some(index), Some(total)) if index == total => {
                sink.on_section_items_complete(
                    key,
                    ItemTally {
                        answered: index,
                        total,
                        correct_count: item.correct_count,
                        total_time: item.total_time,
                    },
                );
            }
            (Some(_), Some(_)) => {}
            _ => debug!(
                index = ?item.index,
                "no question total available; last-question marker skipped"
            ),
        }
    }

    fn close_section(&mut self) -> Option<RunKey> {
        self.context.advance(RunState::InProgress);
        self.context.stream_total = None;
        self.context.current_run_key.take()
    }

    fn append_row<S: EventSink + ?Sized>(&mut self, row: HistoryRow, sink: &mut S) {
        let position = self.history.append(row.clone());
        self.rows_appended += 1;
        debug!(position, status = ?row.status, "history row appended");
        sink.on_history_row(&row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ItemResult, decode_frame};
    use crate::history::RowStatus;
    use crate::sink::testing::{RecordingSink, SinkCall};

    const FRAMES_OK: [&str; 4] = [
        r#"{"progress":"Eval 1/2 - Model: gpt Subject: Math Exam: Final Repetition: 1/1"}"#,
        r#"{"processed_questions":1,"response":{"question_prompt":"2+2?","response":"4","correct_option":"4","is_correct":true}}"#,
        r#"{"eval_result":{"grade":1,"time":0.5}}"#,
        r#"{"done":true}"#,
    ];

    fn key(subject: &str, exam: &str) -> RunKey {
        RunKey {
            subject: subject.into(),
            exam: exam.into(),
        }
    }

    fn progress(index: u32, subject: &str, exam: &str, rep: u32) -> StreamEvent {
        let raw = format!(
            "Eval {index}/9 - Model: gpt Subject: {subject} Exam: {exam} Repetition: {rep}/3"
        );
        decode_frame(&format!("{{\"progress\":{}}}", serde_json::Value::String(raw)))
            .expect("progress frame")
    }

    fn item(index: Option<u32>, total: Option<u32>) -> StreamEvent {
        StreamEvent::ItemResult(ItemResultEvent {
            index,
            total,
            elapsed_seconds: Some(0.1),
            correct_count: Some(1),
            total_time: None,
            result: ItemResult {
                is_correct: true,
                ..ItemResult::default()
            },
        })
    }

    fn summary(grade: f64) -> StreamEvent {
        StreamEvent::RunSummary {
            grade,
            grade_label: grade.to_string(),
            elapsed_seconds: 1.0,
        }
    }

    fn tracker() -> RunTracker {
        RunTracker::new(HistoryTable::new(), TotalSource::ItemFirst)
    }

    #[test]
    fn full_run_produces_progress_item_summary_row_and_completion() {
        let mut tracker = tracker();
        let mut sink = RecordingSink::default();
        for frame in FRAMES_OK {
            let event = decode_frame(frame).expect("valid frame");
            tracker.apply(event, &mut sink);
        }

        let calls = sink.calls();
        assert!(matches!(&calls[0], SinkCall::ProgressParsed(info) if info.model_name == "gpt"));
        assert_eq!(calls[1], SinkCall::SectionOpen(key("Math", "Final")));
        assert_eq!(
            calls[2],
            SinkCall::Item {
                key: Some(key("Math", "Final")),
                index: Some(1),
                is_correct: true
            }
        );
        assert_eq!(
            calls[3],
            SinkCall::Summary(Some(key("Math", "Final")), 1.0, "1".into())
        );
        let SinkCall::History(row) = &calls[4] else {
            panic!("expected history row, got {:?}", calls[4]);
        };
        assert_eq!(row.status, RowStatus::Ok);
        assert_eq!(row.grade, Some(1.0));
        assert_eq!(row.elapsed_seconds, Some(0.5));
        assert_eq!((row.model.as_str(), row.exam.as_str()), ("gpt", "Final"));
        assert_eq!(calls[5], SinkCall::BatchFinished);
        assert_eq!(calls.len(), 6);

        assert_eq!(tracker.history().len(), 1);
        assert_eq!(tracker.state(), RunState::Done);
    }

    #[test]
    fn application_error_appends_error_row_and_stream_continues() {
        let mut tracker = tracker();
        let mut sink = RecordingSink::default();
        tracker.apply(progress(1, "Math", "Final", 1), &mut sink);
        tracker.apply(
            decode_frame(r#"{"error":"model unreachable"}"#).expect("error frame"),
            &mut sink,
        );
        tracker.apply(progress(2, "Math", "Final", 2), &mut sink);
        tracker.apply(item(Some(1), Some(1)), &mut sink);
        tracker.apply(summary(10.0), &mut sink);

        let rows = tracker.history().snapshot();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, RowStatus::Error);
        assert_eq!(rows[0].message.as_deref(), Some("model unreachable"));
        assert_eq!(rows[0].subject, "Math");
        assert_eq!(rows[0].repetition, "1/3");
        assert_eq!(rows[1].status, RowStatus::Ok);
        assert_eq!(rows[1].repetition, "2/3");

        let calls = sink.calls();
        assert!(calls.contains(&SinkCall::Error("model unreachable".into())));
        let opens = calls
            .iter()
            .filter(|c| matches!(c, SinkCall::SectionOpen(_)))
            .count();
        assert_eq!(opens, 2, "error closes the section so the next progress reopens it");
    }

    #[test]
    fn repeated_progress_for_the_same_pair_opens_one_section() {
        let mut tracker = tracker();
        let mut sink = RecordingSink::default();
        tracker.apply(progress(1, "Math", "Final", 1), &mut sink);
        tracker.apply(progress(1, "Math", "Final", 1), &mut sink);
        tracker.apply(progress(2, "Math", "Midterm", 1), &mut sink);

        let opens: Vec<_> = sink
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::SectionOpen(key) => Some(key),
                _ => None,
            })
            .collect();
        assert_eq!(opens, vec![key("Math", "Final"), key("Math", "Midterm")]);
        assert_eq!(
            tracker.context().current_run_key,
            Some(key("Math", "Midterm"))
        );
    }

    #[test]
    fn several_items_before_summary_target_the_current_section() {
        let mut tracker = tracker();
        let mut sink = RecordingSink::default();
        tracker.apply(progress(1, "Bio", "Quiz", 1), &mut sink);
        tracker.apply(item(Some(1), Some(3)), &mut sink);
        assert_eq!(tracker.state(), RunState::AwaitingSummary);
        tracker.apply(item(Some(2), Some(3)), &mut sink);
        tracker.apply(item(Some(3), Some(3)), &mut sink);
        tracker.apply(summary(6.67), &mut sink);
        assert_eq!(tracker.state(), RunState::InProgress);
        assert_eq!(tracker.context().current_run_key, None);

        let calls = sink.calls();
        let item_keys: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                SinkCall::Item { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(item_keys, vec![Some(key("Bio", "Quiz")); 3]);
        let completes: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, SinkCall::ItemsComplete(..)))
            .collect();
        assert_eq!(completes.len(), 1);
        assert!(matches!(
            completes[0],
            SinkCall::ItemsComplete(Some(_), ItemTally { answered: 3, total: 3, .. })
        ));
    }

    #[test]
    fn last_question_uses_stream_total_when_item_has_none() {
        let mut tracker = tracker();
        let mut sink = RecordingSink::default();
        tracker.apply(progress(1, "Bio", "Quiz", 1), &mut sink);
        tracker.apply(
            StreamEvent::Progress(ProgressEvent::Counters {
                processed: 1,
                total: 2,
            }),
            &mut sink,
        );
        tracker.apply(item(Some(2), None), &mut sink);
        assert!(
            sink.calls()
                .iter()
                .any(|c| matches!(c, SinkCall::ItemsComplete(_, ItemTally { total: 2, .. })))
        );
    }

    #[test]
    fn stream_first_precedence_prefers_the_counter_total() {
        let mut tracker = RunTracker::new(HistoryTable::new(), TotalSource::StreamFirst);
        let mut sink = RecordingSink::default();
        tracker.apply(progress(1, "Bio", "Quiz", 1), &mut sink);
        tracker.apply(
            StreamEvent::Progress(ProgressEvent::Counters {
                processed: 4,
                total: 5,
            }),
            &mut sink,
        );
        tracker.apply(item(Some(4), Some(4)), &mut sink);
        assert!(
            !sink
                .calls()
                .iter()
                .any(|c| matches!(c, SinkCall::ItemsComplete(..)))
        );
        tracker.apply(item(Some(5), Some(4)), &mut sink);
        assert!(
            sink.calls()
                .iter()
                .any(|c| matches!(c, SinkCall::ItemsComplete(_, ItemTally { answered: 5, .. })))
        );
    }

    #[test]
    fn missing_totals_skip_the_closing_marker() {
        let mut tracker = tracker();
        let mut sink = RecordingSink::default();
        tracker.apply(item(Some(1), None), &mut sink);
        tracker.apply(item(None, None), &mut sink);
        assert!(
            !sink
                .calls()
                .iter()
                .any(|c| matches!(c, SinkCall::ItemsComplete(..)))
        );
        assert_eq!(
            sink.calls()[0],
            SinkCall::Item {
                key: None,
                index: Some(1),
                is_correct: true
            }
        );
    }

    #[test]
    fn unparsed_label_is_shown_raw_and_keeps_the_section() {
        let mut tracker = tracker();
        let mut sink = RecordingSink::default();
        tracker.apply(progress(1, "Math", "Final", 1), &mut sink);
        tracker.apply(
            StreamEvent::Progress(ProgressEvent::Label {
                raw: "Loading model weights".into(),
                parsed: None,
            }),
            &mut sink,
        );
        assert!(
            sink.calls()
                .contains(&SinkCall::ProgressRaw("Loading model weights".into()))
        );
        assert_eq!(tracker.context().current_run_key, Some(key("Math", "Final")));
    }

    #[test]
    fn events_after_completion_never_reopen_a_section() {
        let mut tracker = tracker();
        let mut sink = RecordingSink::default();
        tracker.apply(progress(1, "Math", "Final", 1), &mut sink);
        tracker.apply(summary(5.0), &mut sink);
        tracker.apply(StreamEvent::Completion, &mut sink);
        tracker.apply(progress(1, "Math", "Final", 1), &mut sink);
        tracker.apply(item(Some(1), Some(1)), &mut sink);

        let opens = sink
            .calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::SectionOpen(_)))
            .count();
        assert_eq!(opens, 1);
        assert_eq!(tracker.state(), RunState::Done);
        assert_eq!(tracker.context().current_run_key, None);
    }

    #[test]
    fn history_only_grows_in_arrival_order() {
        let mut tracker = tracker();
        let mut sink = RecordingSink::default();
        let mut previous = Vec::new();
        let events = [
            summary(1.0),
            progress(1, "A", "X", 1),
            StreamEvent::Error {
                message: "first".into(),
            },
            item(Some(1), Some(1)),
            progress(2, "B", "Y", 1),
            summary(2.0),
            StreamEvent::Completion,
            StreamEvent::Error {
                message: "late".into(),
            },
        ];
        for event in events {
            tracker.apply(event, &mut sink);
            let rows = tracker.history().snapshot();
            assert!(rows.len() >= previous.len());
            assert_eq!(&rows[..previous.len()], &previous[..]);
            previous = rows;
        }
        let statuses: Vec<_> = previous.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                RowStatus::Ok,
                RowStatus::Error,
                RowStatus::Ok,
                RowStatus::Error
            ]
        );
        assert_eq!(previous[0].model, "");
    }

    #[test]
    fn a_fresh_tracker_does_not_inherit_previous_context() {
        let history = HistoryTable::new();
        let mut first = RunTracker::new(history.clone(), TotalSource::ItemFirst);
        let mut sink = RecordingSink::default();
        first.apply(progress(1, "Math", "Final", 1), &mut sink);

        let mut second = RunTracker::new(history.clone(), TotalSource::ItemFirst);
        second.apply(summary(3.0), &mut sink);
        assert!(second.context().last_progress.is_none());
        let rows = history.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject, "");
    }

    #[test]
    fn string_grades_reach_the_sink_as_number_and_label() {
        let mut tracker = tracker();
        let mut sink = RecordingSink::default();
        tracker.apply(progress(1, "Math", "Final", 1), &mut sink);
        let event = decode_frame(r#"{"eval_result":{"grade":"7.5 (3/4)","time":2}}"#)
            .expect("summary frame");
        tracker.apply(event, &mut sink);

        assert!(sink.calls().contains(&SinkCall::Summary(
            Some(key("Math", "Final")),
            7.5,
            "7.5 (3/4)".into()
        )));
        let rows = tracker.history().snapshot();
        assert_eq!(rows[0].grade, Some(7.5));
        assert_eq!(rows[0].grade_label.as_deref(), Some("7.5 (3/4)"));
    }

    #[test]
    fn elapsed_time_is_measured_from_context_creation() {
        let mut context = RunContext::new();
        assert!(context.elapsed_millis() >= 0);
        context.started_at_millis -= 1_500;
        assert!(context.elapsed_millis() >= 1_500);
        context.started_at_millis = Utc::now().timestamp_millis() + 60_000;
        assert_eq!(context.elapsed_millis(), 0);
    }
}
