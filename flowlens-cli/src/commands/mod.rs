use std::fmt::Display;
use std::process::ExitCode;

use crate::exit;

pub mod config;
pub mod health;
pub mod lookup;
pub mod run;
pub mod state;

/// Print the one-line configuration failure and pick the fatal exit code.
pub(crate) fn config_failure(e: impl Display) -> ExitCode {
    eprintln!("ConfigurationError: {e}");
    ExitCode::from(exit::FAILURE)
}
