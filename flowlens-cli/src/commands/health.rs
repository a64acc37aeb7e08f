//! Attribution API health probe

use std::process::ExitCode;

use anyhow::Result;
use flowlens_core::config::AttributionConfig;
use flowlens_core::{AttributionClient, ConfigLoader, ProcessEnv};

use super::config_failure;
use crate::exit;

pub async fn run() -> Result<ExitCode> {
    let settings = match ConfigLoader::load() {
        Ok(settings) => settings,
        Err(e) => return Ok(config_failure(e)),
    };
    let config = match AttributionConfig::resolve(&settings.attribution, ProcessEnv) {
        Ok(config) => config,
        Err(e) => return Ok(config_failure(e)),
    };
    let client = match AttributionClient::new(&config) {
        Ok(client) => client,
        Err(e) => return Ok(config_failure(e)),
    };
    match client.check_health().await {
        Ok(()) => {
            println!("Attribution API at {} is healthy", client.base_url());
            Ok(ExitCode::from(exit::SUCCESS))
        }
        Err(e) => {
            eprintln!("{}: {e}", e.kind());
            Ok(ExitCode::from(exit::FAILURE))
        }
    }
}
