use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MasterConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());

    parse_config(&content)
}

/// Parse configuration text (after env substitution).
pub fn parse_config(content: &str) -> Result<MasterConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: MasterConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!("Configuration loaded successfully");
    Ok(config)
}

#[instrument]
pub fn generate_default_config() -> MasterConfig {
    MasterConfig {
        instruments: InstrumentsConfig {
            master_path: default_instrument_master_path(),
            closing_prices_path: Some("data/closing_prices.csv".to_string()),
            tracked: vec![
                TrackedUnderlying {
                    symbol: "NIFTY".to_string(),
                    expiries: 2,
                    always_on: true,
                },
                TrackedUnderlying {
                    symbol: "BANKNIFTY".to_string(),
                    expiries: 1,
                    always_on: true,
                },
            ],
        },
        feed: FeedConfig {
            client_id: "${BROKER_CLIENT_ID}".to_string(),
            access_token: "${BROKER_ACCESS_TOKEN}".to_string(),
            ..FeedConfig::default()
        },
        broker_api: BrokerApiConfig {
            client_id: "${BROKER_CLIENT_ID}".to_string(),
            access_token: "${BROKER_ACCESS_TOKEN}".to_string(),
            ..BrokerApiConfig::default()
        },
        watchlist: WatchlistConfig {
            store: WatchlistStoreKind::File,
            path: Some("data/watchlists.json".to_string()),
        },
        ..MasterConfig::default()
    }
}

#[instrument]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &MasterConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}
