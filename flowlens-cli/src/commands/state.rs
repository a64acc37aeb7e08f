//! Inspect the persisted run state

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use flowlens_core::config::state_path;
use flowlens_core::{FileStateStore, ProcessEnv, StateStore};

use crate::exit;

#[derive(Args, Debug)]
pub struct StateArgs {
    /// Print the state as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: StateArgs) -> Result<ExitCode> {
    let store = FileStateStore::new(state_path(&ProcessEnv));
    let state = store.load()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(ExitCode::from(exit::SUCCESS));
    }

    println!("State file:      {}", store.path().display());
    match state.last_window_end {
        Some(end) => println!("Last window end: {}", end.to_rfc3339()),
        None => println!("Last window end: (never run)"),
    }
    if let Some(updated) = state.updated_at {
        println!("Updated at:      {}", updated.to_rfc3339());
    }
    Ok(ExitCode::from(exit::SUCCESS))
}
