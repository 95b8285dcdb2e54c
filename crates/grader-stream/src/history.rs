use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::progress::ProgressInfo;

/// Whether a finished run produced a grade or failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Ok,
    Error,
}

/// Display-ready record of one completed or failed run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub subject: String,
    pub exam: String,
    /// `current/total` repetition text, empty when no progress was seen.
    pub repetition: String,
    pub grade: Option<f64>,
    pub grade_label: Option<String>,
    pub elapsed_seconds: Option<f64>,
    pub status: RowStatus,
    /// Server error message for `RowStatus::Error` rows.
    pub message: Option<String>,
}

impl HistoryRow {
    pub(crate) fn summary(
        progress: Option<&ProgressInfo>,
        grade: f64,
        grade_label: &str,
        elapsed_seconds: f64,
    ) -> Self {
        Self {
            grade: Some(grade),
            grade_label: Some(grade_label.to_string()),
            elapsed_seconds: Some(elapsed_seconds),
            status: RowStatus::Ok,
            ..Self::identified(progress)
        }
    }

    pub(crate) fn failure(progress: Option<&ProgressInfo>, message: &str) -> Self {
        Self {
            status: RowStatus::Error,
            message: Some(message.to_string()),
            ..Self::identified(progress)
        }
    }

    fn identified(progress: Option<&ProgressInfo>) -> Self {
        let (model, subject, exam, repetition) = match progress {
            Some(p) => (
                p.model_name.clone(),
                p.subject_name.clone(),
                p.exam_name.clone(),
                format!("{}/{}", p.repetition, p.total_repetitions),
            ),
            None => Default::default(),
        };
        Self {
            timestamp: Utc::now(),
            model,
            subject,
            exam,
            repetition,
            grade: None,
            grade_label: None,
            elapsed_seconds: None,
            status: RowStatus::Ok,
            message: None,
        }
    }
}

/// Append-only table of history rows shared across submissions.
///
/// Clones share the same rows. Rows are never removed or reordered.
#[derive(Clone, Debug, Default)]
pub struct HistoryTable {
    rows: Arc<Mutex<Vec<HistoryRow>>>,
}

impl HistoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row and returns its position.
    pub fn append(&self, row: HistoryRow) -> usize {
        let mut rows = self.lock();
        rows.push(row);
        rows.len() - 1
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the rows in append order.
    pub fn snapshot(&self) -> Vec<HistoryRow> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HistoryRow>> {
        // Rows are only ever pushed, so a poisoned guard still holds a valid table.
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
