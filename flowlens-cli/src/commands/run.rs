//! The default command: process one window

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use flowlens_core::{Config, ConfigLoader, Pipeline, PipelineError, RunReport, RunRequest};
use tracing::{error, warn};

use crate::exit;

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Window start (RFC 3339); defaults to the end of the last processed window
    #[arg(long, value_parser = parse_instant)]
    pub start: Option<DateTime<Utc>>,

    /// Window end (RFC 3339); defaults to now, truncated to the minute
    #[arg(long, value_parser = parse_instant)]
    pub end: Option<DateTime<Utc>>,

    /// Skip the language-model summary
    #[arg(long)]
    pub no_enrich: bool,

    /// Skip the channel notification
    #[arg(long)]
    pub no_notify: bool,

    /// Use an in-memory warehouse, print the message, leave run state alone
    #[arg(long)]
    pub dry_run: bool,

    /// Abort the run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Exit with code 2 when the notification fails
    #[arg(long)]
    pub strict_notify: bool,
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

enum Stopped {
    Interrupted,
    TimedOut(u64),
}

async fn deadline(timeout: Option<u64>) {
    match timeout {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

pub async fn run(args: RunArgs) -> Result<ExitCode> {
    let mut settings = match ConfigLoader::load() {
        Ok(settings) => settings,
        Err(e) => return Ok(fatal(e.into())),
    };
    if args.no_enrich {
        settings.enrichment.enabled = false;
    }
    if args.no_notify {
        settings.notify.enabled = false;
    }

    let config = match Config::from_env(&settings) {
        Ok(config) => config,
        Err(e) => return Ok(fatal(e.into())),
    };
    let pipeline = match Pipeline::from_config(&config, args.dry_run) {
        Ok(pipeline) => pipeline,
        Err(e) => return Ok(fatal(e)),
    };

    let request = RunRequest {
        start: args.start,
        end: args.end,
        now: Utc::now(),
        dry_run: args.dry_run,
    };

    // Run state is written last, so dropping the run future never advances it.
    let outcome = tokio::select! {
        result = pipeline.run(request) => Ok(result),
        _ = tokio::signal::ctrl_c() => Err(Stopped::Interrupted),
        _ = deadline(args.timeout) => Err(Stopped::TimedOut(args.timeout.unwrap_or_default())),
    };

    match outcome {
        Ok(Ok(report)) => {
            print!("{}", format_report(&report));
            Ok(ExitCode::from(exit::for_report(&report, args.strict_notify)))
        }
        Ok(Err(e)) => Ok(fatal(e)),
        Err(Stopped::Interrupted) => {
            warn!("interrupted, run state not advanced");
            Ok(ExitCode::from(exit::INTERRUPTED))
        }
        Err(Stopped::TimedOut(secs)) => {
            error!(timeout_secs = secs, "run timed out, run state not advanced");
            eprintln!("Timeout: run exceeded {secs}s");
            Ok(ExitCode::from(exit::FAILURE))
        }
    }
}

fn fatal(e: PipelineError) -> ExitCode {
    eprintln!("{}: {e}", e.kind());
    ExitCode::from(exit::FAILURE)
}

fn format_report(report: &RunReport) -> String {
    let Some(window) = report.window else {
        return "Nothing to do: run state is already at the requested end\n".to_string();
    };
    let mut out = format!(
        "Window:   {window}\nFetched:  {}\nWritten:  {}\n",
        report.records_fetched, report.rows_written
    );
    for (stage, outcome) in &report.stages {
        out.push_str(&format!("  {stage:<8} {outcome}\n"));
    }
    if report.is_degraded() {
        out.push_str("Completed with degraded stages\n");
    }
    if report.state_advanced {
        out.push_str(&format!("Run state advanced to {}\n", window.end().to_rfc3339()));
    }
    out
}
