//! Config command implementation

use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Subcommand};
use flowlens_core::{Config, ConfigLoader};

use super::config_failure;
use crate::exit;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show merged settings and the resolved environment
    Show,
    /// Show config file locations
    Path,
}

pub fn run(args: ConfigArgs) -> Result<ExitCode> {
    match args.command {
        ConfigCommand::Show => show(),
        ConfigCommand::Path => {
            print_paths();
            Ok(ExitCode::from(exit::SUCCESS))
        }
    }
}

fn show() -> Result<ExitCode> {
    let settings = match ConfigLoader::load() {
        Ok(settings) => settings,
        Err(e) => return Ok(config_failure(e)),
    };
    println!("{}", toml::to_string_pretty(&settings)?);

    match Config::from_env(&settings) {
        Ok(config) => {
            println!("{config}");
            Ok(ExitCode::from(exit::SUCCESS))
        }
        Err(e) => Ok(config_failure(e)),
    }
}

fn print_paths() {
    let user = ConfigLoader::user_config_path();
    let project = ConfigLoader::project_config_path();
    let marker = |exists: bool| if exists { "" } else { " (not found)" };

    println!("User config:    {}{}", user.display(), marker(user.exists()));
    println!("Project config: {}{}", project.display(), marker(project.exists()));
}
