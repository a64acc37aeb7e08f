//! Address attribution lookup

use std::collections::HashMap;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use flowlens_core::config::AttributionConfig;
use flowlens_core::{AddressAttribution, AttributionClient, ConfigLoader, ProcessEnv};

use super::config_failure;
use crate::exit;

#[derive(Args, Debug)]
pub struct LookupArgs {
    /// Wallet addresses to look up
    #[arg(required = true)]
    pub addresses: Vec<String>,

    /// Print raw JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: LookupArgs) -> Result<ExitCode> {
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
    let found = match client.address_attributions(&args.addresses).await {
        Ok(found) => found,
        Err(e) => {
            eprintln!("{}: {e}", e.kind());
            return Ok(ExitCode::from(exit::FAILURE));
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else {
        println!("{}", render_table(&args.addresses, &found));
    }
    Ok(ExitCode::from(exit::SUCCESS))
}

fn render_table(addresses: &[String], found: &HashMap<String, AddressAttribution>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Address").fg(Color::Cyan),
        Cell::new("Entity").fg(Color::Cyan),
        Cell::new("Custodian").fg(Color::Cyan),
        Cell::new("Beneficial owner").fg(Color::Cyan),
        Cell::new("OFAC").fg(Color::Cyan),
        Cell::new("Wallet").fg(Color::Cyan),
    ]);

    let text = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    for address in addresses {
        match found.get(address) {
            Some(attribution) => {
                let ofac = if attribution.is_sanctioned() {
                    Cell::new(attribution.sdn_name.as_deref().unwrap_or("sanctioned")).fg(Color::Red)
                } else {
                    Cell::new("no")
                };
                table.add_row(vec![
                    Cell::new(address),
                    Cell::new(text(&attribution.entity)),
                    Cell::new(text(&attribution.custodian)),
                    Cell::new(text(&attribution.beneficial_owner)),
                    ofac,
                    Cell::new(text(&attribution.wallet_id)),
                ]);
            }
            None => {
                table.add_row(vec![
                    Cell::new(address),
                    Cell::new("(unattributed)").fg(Color::DarkGrey),
                ]);
            }
        }
    }
    table
}
