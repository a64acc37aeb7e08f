use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod exit;

#[derive(Parser)]
#[command(name = "flowlens", about = "Fetch, summarize, store and announce on-chain attribution data")]
#[command(version, propagate_version = true, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Flags for the default `run` command
    #[command(flatten)]
    run: commands::run::RunArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the next window (default)
    Run(commands::run::RunArgs),
    /// Probe the attribution API
    Health,
    /// Look up attributions for wallet addresses
    Lookup(commands::lookup::LookupArgs),
    /// Show the persisted run state
    State(commands::state::StateArgs),
    /// Show configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        None => commands::run::run(cli.run).await,
        Some(Commands::Run(args)) => commands::run::run(args).await,
        Some(Commands::Health) => commands::health::run().await,
        Some(Commands::Lookup(args)) => commands::lookup::run(args).await,
        Some(Commands::State(args)) => commands::state::run(args),
        Some(Commands::Config(args)) => commands::config::run(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run_with_top_level_flags() {
        let cli = Cli::try_parse_from(["flowlens", "--dry-run", "--no-notify"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.run.dry_run);
        assert!(cli.run.no_notify);
        assert!(!cli.run.no_enrich);
    }

    #[test]
    fn explicit_run_subcommand_parses_window() {
        let cli = Cli::try_parse_from([
            "flowlens",
            "run",
            "--start",
            "2024-03-01T11:00:00Z",
            "--end",
            "2024-03-01T12:00:00+00:00",
            "--strict-notify",
            "--timeout",
            "300",
        ])
        .unwrap();
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.start.unwrap().to_rfc3339(), "2024-03-01T11:00:00+00:00");
        assert_eq!(args.end.unwrap().to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert!(args.strict_notify);
        assert_eq!(args.timeout, Some(300));
    }

    #[test]
    fn malformed_instant_is_rejected() {
        assert!(Cli::try_parse_from(["flowlens", "--start", "yesterday"]).is_err());
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["flowlens", "health", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Commands::Health)));
    }

    #[test]
    fn lookup_requires_an_address() {
        assert!(Cli::try_parse_from(["flowlens", "lookup"]).is_err());
        let cli = Cli::try_parse_from(["flowlens", "lookup", "bc1qa", "bc1qb"]).unwrap();
        let Some(Commands::Lookup(args)) = cli.command else {
            panic!("expected lookup");
        };
        assert_eq!(args.addresses, vec!["bc1qa", "bc1qb"]);
    }
}
