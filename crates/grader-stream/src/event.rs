use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DecodeError;
use crate::progress::{ProgressInfo, parse_progress_label};

/// Optional token that precedes the JSON payload of a frame.
pub const DATA_PREFIX: &str = "data:";

/// Typed event decoded from one frame of the progress stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Application-level failure reported by the server for the current run.
    Error { message: String },
    /// Batch or per-question progress.
    Progress(ProgressEvent),
    /// Outcome of one evaluated question.
    ItemResult(ItemResultEvent),
    /// Aggregate result of the run that just finished.
    RunSummary {
        /// Leading number of the server's grade text.
        grade: f64,
        /// Grade exactly as sent, e.g. `7.5 (3/4)`.
        grade_label: String,
        elapsed_seconds: f64,
    },
    /// The batch is finished.
    Completion,
}

impl StreamEvent {
    /// Stable short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Error { .. } => "error",
            Self::Progress(ProgressEvent::Label { .. }) => "progress_label",
            Self::Progress(ProgressEvent::Counters { .. }) => "progress_counters",
            Self::ItemResult(_) => "item_result",
            Self::RunSummary { .. } => "run_summary",
            Self::Completion => "completion",
        }
    }
}

/// The two progress shapes carried by the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Free-text batch label; `parsed` is `None` when it does not follow the
    /// `Eval a/b - Model: ...` grammar.
    Label {
        raw: String,
        parsed: Option<ProgressInfo>,
    },
    /// Bare question counters without a label.
    Counters { processed: u32, total: u32 },
}

/// One question result plus the counters that came with it.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemResultEvent {
    /// 1-based question number within the exam, when known.
    pub index: Option<u32>,
    /// Number of questions in the exam, when sent with the item.
    pub total: Option<u32>,
    pub elapsed_seconds: Option<f64>,
    /// Running number of correct answers in the exam.
    pub correct_count: Option<u32>,
    /// Exam wall time; only sent with the last question.
    pub total_time: Option<f64>,
    pub result: ItemResult,
}

/// Question prompt, model answer and grading verdict.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    #[serde(rename = "question_prompt", default)]
    pub prompt: String,
    #[serde(rename = "response", default)]
    pub model_response: String,
    #[serde(default)]
    pub correct_option: String,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
}

/// Decodes one raw frame.
///
/// The optional `data:` prefix is stripped before parsing. Errors are
/// recoverable; callers skip the frame and continue.
pub fn decode_frame(frame: &str) -> Result<StreamEvent, DecodeError> {
    let trimmed = frame.trim();
    let payload = trimmed
        .strip_prefix(DATA_PREFIX)
        .map(str::trim_start)
        .unwrap_or(trimmed);
    let value: Value =
        serde_json::from_str(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    decode_value(&value)
}

/// Classifies an already parsed JSON payload.
///
/// Shapes are tried in a fixed order and the first match wins: `error`,
/// `progress`, `processed_questions` + `response`, `response`,
/// `processed_questions` + `total_questions`, `eval_result`, `done`.
pub fn decode_value(value: &Value) -> Result<StreamEvent, DecodeError> {
    let Some(obj) = value.as_object() else {
        return Err(DecodeError::UnrecognizedShape {
            keys: format!("<{}>", json_type_name(value)),
        });
    };

    if let Some(error) = present(obj, "error") {
        let message = match error {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        return Ok(StreamEvent::Error { message });
    }

    if let Some(progress) = present(obj, "progress") {
        let Some(raw) = progress.as_str() else {
            return Err(DecodeError::invalid("progress", "expected a string label"));
        };
        return Ok(StreamEvent::Progress(ProgressEvent::Label {
            raw: raw.to_string(),
            parsed: parse_progress_label(raw),
        }));
    }

    let processed = present(obj, "processed_questions");
    if let Some(response) = present(obj, "response") {
        let result = item_result(response)?;
        let event = if processed.is_some() {
            ItemResultEvent {
                index: opt_u32(obj, "processed_questions")?,
                total: opt_u32(obj, "total_questions")?,
                elapsed_seconds: opt_f64(obj, "time")?,
                correct_count: opt_u32(obj, "correct_count")?,
                total_time: opt_f64(obj, "total_time")?,
                result,
            }
        } else {
            let nested = response.as_object().unwrap_or(obj);
            ItemResultEvent {
                index: opt_u32(nested, "processed_questions")?,
                total: opt_u32(nested, "total_questions")?,
                elapsed_seconds: opt_f64(nested, "time")?,
                correct_count: opt_u32(nested, "correct_count")?,
                total_time: opt_f64(nested, "total_time")?,
                result,
            }
        };
        return Ok(StreamEvent::ItemResult(event));
    }

    if processed.is_some()
        && let Some(total) = opt_u32(obj, "total_questions")?
    {
        let processed = opt_u32(obj, "processed_questions")?.unwrap_or_default();
        return Ok(StreamEvent::Progress(ProgressEvent::Counters { processed, total }));
    }

    if let Some(summary) = present(obj, "eval_result") {
        let Some(summary) = summary.as_object() else {
            return Err(DecodeError::invalid("eval_result", "expected an object"));
        };
        let (grade, grade_label) = grade(summary)?;
        let elapsed_seconds = opt_f64(summary, "time")?
            .ok_or_else(|| DecodeError::invalid("time", "missing from eval_result"))?;
        return Ok(StreamEvent::RunSummary {
            grade,
            grade_label,
            elapsed_seconds,
        });
    }

    if present(obj, "done").is_some_and(truthy) {
        return Ok(StreamEvent::Completion);
    }

    Err(DecodeError::UnrecognizedShape {
        keys: obj.keys().cloned().collect::<Vec<_>>().join(","),
    })
}

fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn item_result(response: &Value) -> Result<ItemResult, DecodeError> {
    if !response.is_object() {
        return Err(DecodeError::invalid("response", "expected an object"));
    }
    ItemResult::deserialize(response).map_err(|e| DecodeError::invalid("response", e.to_string()))
}

fn opt_u32(obj: &Map<String, Value>, key: &'static str) -> Result<Option<u32>, DecodeError> {
    let Some(value) = present(obj, key) else {
        return Ok(None);
    };
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| DecodeError::invalid(key, format!("expected a count, got {value}")))
}

fn opt_f64(obj: &Map<String, Value>, key: &'static str) -> Result<Option<f64>, DecodeError> {
    let Some(value) = present(obj, key) else {
        return Ok(None);
    };
    value
        .as_f64()
        .map(Some)
        .ok_or_else(|| DecodeError::invalid(key, format!("expected a number, got {value}")))
}

fn grade(summary: &Map<String, Value>) -> Result<(f64, String), DecodeError> {
    match present(summary, "grade") {
        Some(Value::Number(n)) => {
            let grade = n
                .as_f64()
                .ok_or_else(|| DecodeError::invalid("grade", "not representable"))?;
            Ok((grade, n.to_string()))
        }
        Some(Value::String(label)) => label
            .split_whitespace()
            .next()
            .and_then(|head| head.parse::<f64>().ok())
            .map(|grade| (grade, label.clone()))
            .ok_or_else(|| DecodeError::invalid("grade", format!("no leading number in {label:?}"))),
        Some(other) => Err(DecodeError::invalid(
            "grade",
            format!("expected a number or string, got {other}"),
        )),
        None => Err(DecodeError::invalid("grade", "missing from eval_result")),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
