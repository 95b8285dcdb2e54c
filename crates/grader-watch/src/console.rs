//! Plain-text rendering of a batch evaluation stream.

use std::io::Write;

use grader_stream::{
    EventSink, HistoryRow, ItemResult, ItemTally, ProgressInfo, ProgressUpdate, RowStatus,
    RunKey, StreamEnd, strip_emphasis,
};

/// Writes one line per sink call.
///
/// Write failures are ignored: a closed pipe must not stop the stream from
/// being consumed and recorded.
pub struct ConsoleSink<W: Write> {
    out: W,
    rows_recorded: usize,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            rows_recorded: 0,
        }
    }

    pub fn rows_recorded(&self) -> usize {
        self.rows_recorded
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

fn section_title(key: &RunKey) -> String {
    format!(
        "{} / {}",
        strip_emphasis(&key.subject),
        strip_emphasis(&key.exam)
    )
}

impl<W: Write> EventSink for ConsoleSink<W> {
    fn on_error(&mut self, message: &str) {
        let _ = writeln!(self.out, "  error: {message}");
    }

    fn on_progress(&mut self, update: ProgressUpdate<'_>) {
        let line = match update {
            ProgressUpdate::Parsed(info) => {
                format!("[{:>3}%] {} {}", info.percent(), info.eval_message(), info.detail_message())
            }
            ProgressUpdate::Raw(text) => format!("[    ] {}", strip_emphasis(text)),
            ProgressUpdate::Fraction { processed, total } => format!(
                "[{:>3}%]   question {processed}/{total}",
                update.percent().unwrap_or(0)
            ),
        };
        let _ = writeln!(self.out, "{line}");
    }

    fn on_section_open(&mut self, key: &RunKey, context: &ProgressInfo) {
        let _ = writeln!(
            self.out,
            "== {} | {} | repetition {}/{} ==",
            section_title(key),
            strip_emphasis(&context.model_name),
            context.repetition,
            context.total_repetitions
        );
    }

    fn on_item_result(
        &mut self,
        _key: Option<&RunKey>,
        index: Option<u32>,
        result: &ItemResult,
        elapsed_seconds: Option<f64>,
    ) {
        let index = index.map_or_else(|| "?".to_string(), |i| i.to_string());
        let mark = if result.is_correct { "ok" } else { "wrong" };
        let elapsed = elapsed_seconds.map_or_else(String::new, |s| format!(" in {s:.2}s"));
        let _ = writeln!(
            self.out,
            "  Q{index} [{mark}] answered {:?}, expected {:?}{elapsed}",
            result.model_response.trim(),
            result.correct_option
        );
    }

    fn on_section_items_complete(&mut self, _key: Option<&RunKey>, tally: ItemTally) {
        let correct = tally
            .correct_count
            .map_or_else(|| "?".to_string(), |c| c.to_string());
        let time = tally
            .total_time
            .map_or_else(String::new, |t| format!(", total time {t:.2}s"));
        let _ = writeln!(
            self.out,
            "  all {} question(s) graded: {correct}/{} correct{time}",
            tally.answered, tally.total
        );
    }

    fn on_section_summary(
        &mut self,
        _key: Option<&RunKey>,
        _grade: f64,
        grade_label: &str,
        elapsed_seconds: f64,
    ) {
        let _ = writeln!(
            self.out,
            "  result: {grade_label} correct, time {elapsed_seconds:.2}s"
        );
    }

    fn on_history_row(&mut self, _row: &HistoryRow) {
        self.rows_recorded += 1;
    }

    fn on_batch_finished(&mut self) {
        let _ = writeln!(self.out, "Batch evaluation finished.");
    }

    fn on_stream_end(&mut self, end: &StreamEnd) {
        match end {
            StreamEnd::Closed => {}
            StreamEnd::ConnectionError { message } => {
                let _ = writeln!(self.out, "Connection error: {message}");
            }
            StreamEnd::Rejected { status } => {
                let _ = writeln!(
                    self.out,
                    "Error starting batch evaluation (HTTP {status})."
                );
            }
        }
    }
}

const HEADERS: [&str; 7] = ["Model", "Subject", "Exam", "Rep", "Grade", "Time", "Status"];

fn row_cells(row: &HistoryRow) -> [String; 7] {
    let grade = row
        .grade_label
        .clone()
        .or_else(|| row.grade.map(|g| g.to_string()))
        .unwrap_or_else(|| "-".into());
    let time = row
        .elapsed_seconds
        .map_or_else(|| "-".into(), |s| format!("{s:.2}s"));
    let status = match (row.status, &row.message) {
        (RowStatus::Ok, _) => "ok".to_string(),
        (RowStatus::Error, Some(message)) => format!("error: {message}"),
        (RowStatus::Error, None) => "error".to_string(),
    };
    [
        strip_emphasis(&row.model),
        strip_emphasis(&row.subject),
        strip_emphasis(&row.exam),
        row.repetition.clone(),
        grade,
        time,
        status,
    ]
}

/// Renders history rows as an aligned text table.
pub fn render_history(rows: &[HistoryRow], out: &mut impl Write) -> std::io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "No evaluations recorded.");
    }
    let cells: Vec<[String; 7]> = rows.iter().map(row_cells).collect();
    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |values: &[String]| {
        values
            .iter()
            .zip(widths)
            .map(|(value, width)| format!("{value:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    writeln!(out, "{}", line(&HEADERS.map(String::from)))?;
    for row in &cells {
        writeln!(out, "{}", line(row))?;
    }
    Ok(())
}

/// Writes history rows as JSON lines.
pub fn render_history_json(rows: &[HistoryRow], out: &mut impl Write) -> std::io::Result<()> {
    for row in rows {
        let json = serde_json::to_string(row).map_err(std::io::Error::other)?;
        writeln!(out, "{json}")?;
    }
    Ok(())
}
