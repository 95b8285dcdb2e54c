//! `grader-watch`: submits a batch evaluation and follows its progress stream.

mod console;
mod request;

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use grader_stream::observability::init_observability;
use grader_stream::{
    BatchMonitor, HttpTransport, HttpTransportConfig, MonitorConfig, StreamOutcome, TotalSource,
};
use tracing::info;

use crate::console::{ConsoleSink, render_history, render_history_json};
use crate::request::BatchRequest;

#[derive(Parser)]
#[command(
    name = "grader-watch",
    about = "Run a batch evaluation and watch its progress stream",
    version
)]
struct Cli {
    /// Endpoint receiving the batch request (falls back to GRADER_STREAM_URL)
    #[arg(long)]
    url: Option<String>,

    /// Send this prepared JSON body instead of building one from flags
    #[arg(long, conflicts_with_all = ["exams", "models"])]
    body_file: Option<PathBuf>,

    /// Exam id to evaluate (repeatable)
    #[arg(long = "exam")]
    exams: Vec<String>,

    /// Model id to evaluate (repeatable)
    #[arg(long = "model")]
    models: Vec<String>,

    #[arg(long, default_value_t = 1)]
    repetitions: u32,

    /// Extra instructions prepended to every question
    #[arg(long, default_value = "")]
    user_prompt: String,

    /// Extra request header as NAME:VALUE (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Give up when no chunk arrives for this many seconds
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Which question total marks the last question: item_first or stream_first
    #[arg(long)]
    total_source: Option<TotalSource>,

    /// Print history rows as JSON lines instead of a table
    #[arg(long)]
    json: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("header `{raw}` must look like NAME:VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header `{raw}` has an empty name"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn request_body(cli: &Cli) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(path) = &cli.body_file {
        let body = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        // Fail before connecting when the file is not JSON.
        let parsed: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| format!("{} is not valid JSON: {e}", path.display()))?;
        if let Ok(request) = serde_json::from_value::<BatchRequest>(parsed) {
            println!("{}", request.plan_summary());
        }
        return Ok(body);
    }

    let request = BatchRequest {
        exams: cli.exams.clone(),
        models: cli.models.clone(),
        repetitions: cli.repetitions,
        user_prompt: cli.user_prompt.clone(),
    };
    request.validate()?;
    println!("{}", request.plan_summary());
    Ok(serde_json::to_string(&request)?)
}

fn monitor_config(cli: &Cli) -> Result<MonitorConfig, Box<dyn std::error::Error>> {
    let mut config = MonitorConfig::from_env()?;
    if let Some(source) = cli.total_source {
        config = config.total_source(source);
    }
    if let Some(secs) = cli.idle_timeout_secs {
        config = config.idle_timeout(Duration::from_secs(secs))?;
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let body = request_body(&cli)?;

    let mut http = match &cli.url {
        Some(url) => HttpTransportConfig::new(url.trim()),
        None => HttpTransportConfig::from_env()?,
    };
    for (name, value) in &cli.headers {
        http = http.header(name, value);
    }
    let transport = HttpTransport::new(http)?;
    let mut monitor = BatchMonitor::new(monitor_config(&cli)?);

    let mut sink = ConsoleSink::new(std::io::stdout());
    let report = monitor.submit(&transport, body, &mut sink).await;
    info!(
        submission_id = %report.submission_id,
        frames = report.frames,
        skipped = report.skipped_frames,
        rows = sink.rows_recorded(),
        "evaluation stream finished"
    );

    let rows = monitor.history().snapshot();
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout)?;
    if cli.json {
        render_history_json(&rows, &mut stdout)?;
    } else {
        render_history(&rows, &mut stdout)?;
    }

    Ok(match report.outcome {
        StreamOutcome::Closed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_observability();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
