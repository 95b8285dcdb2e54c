use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PROGRESS_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^Eval (\d+)/(\d+) - Model: (.*?) Subject: (.*?) Exam: (.*?) Repetition: (\d+)/(\d+)$",
    )
    .expect("progress label pattern is valid")
});

/// Structured view of a batch progress label.
///
/// Labels look like
/// `Eval 3/12 - Model: gpt Subject: Math Exam: Final Repetition: 1/2`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// 1-based position of this evaluation in the batch.
    pub current_index: u32,
    /// Number of evaluations in the batch.
    pub total_count: u32,
    pub model_name: String,
    pub subject_name: String,
    pub exam_name: String,
    pub repetition: u32,
    pub total_repetitions: u32,
}

impl ProgressInfo {
    /// Short counter label, e.g. `Eval 3/12`.
    pub fn eval_message(&self) -> String {
        format!("Eval {}/{}", self.current_index, self.total_count)
    }

    /// Human-readable description of the evaluation in progress.
    ///
    /// The server wraps names in `<b>` emphasis tags; they are removed here.
    pub fn detail_message(&self) -> String {
        format!(
            "Evaluating {} on {} with {} ({}/{})",
            strip_emphasis(&self.model_name),
            strip_emphasis(&self.subject_name),
            strip_emphasis(&self.exam_name),
            self.repetition,
            self.total_repetitions
        )
    }

    /// Batch completion in whole percent.
    pub fn percent(&self) -> u8 {
        percent_of(self.current_index, self.total_count)
    }
}

/// Parses a progress label, returning `None` unless the whole text matches.
///
/// Names are kept verbatim. Any numeric field that does not fit a `u32`, or
/// a current index outside `1..=total`, rejects the label.
pub fn parse_progress_label(text: &str) -> Option<ProgressInfo> {
    let caps = PROGRESS_LABEL.captures(text)?;
    let number = |idx: usize| caps.get(idx)?.as_str().parse::<u32>().ok();

    let info = ProgressInfo {
        current_index: number(1)?,
        total_count: number(2)?,
        model_name: caps.get(3)?.as_str().to_string(),
        subject_name: caps.get(4)?.as_str().to_string(),
        exam_name: caps.get(5)?.as_str().to_string(),
        repetition: number(6)?,
        total_repetitions: number(7)?,
    };
    if info.current_index == 0 || info.current_index > info.total_count {
        return None;
    }
    Some(info)
}

/// Rounds `part / whole` to a percentage, clamped to 100.
pub(crate) fn percent_of(part: u32, whole: u32) -> u8 {
    if whole == 0 {
        return 0;
    }
    let pct = (f64::from(part) / f64::from(whole) * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Removes the `<b>`/`</b>` emphasis tags the server puts around names.
pub fn strip_emphasis(text: &str) -> String {
    text.replace("<b>", "").replace("</b>", "")
}
