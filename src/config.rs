use std::{env, time::Duration};

use alloy::primitives::Address;
use dotenvy::dotenv;
use eyre::{eyre, Result, WrapErr};
use tracing::info;

use crate::contracts::ContractSet;
use crate::scanner::ScanSettings;
use crate::subscriber::SubscriberSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub db_path: String,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub poll_interval: Duration,
    pub backfill_blocks: u64,
    pub max_block_range: u64,
    pub confirmations: u64,
    pub rpc_timeout: Duration,
    pub channel_capacity: usize,
    /// Set when every required contract address is configured.
    pub contracts: Option<ContractSet>,
}

impl Config {
    pub fn subscriber_settings(&self) -> SubscriberSettings {
        SubscriberSettings {
            poll_interval: self.poll_interval,
            backfill_blocks: self.backfill_blocks,
            max_block_range: self.max_block_range,
            confirmations: self.confirmations,
            channel_capacity: self.channel_capacity,
        }
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            call_timeout: self.rpc_timeout,
            ..ScanSettings::default()
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn load() -> Result<Config> {
    dotenv().ok();

    let cfg = from_lookup(|key| env::var(key).ok())?;
    info!("Loaded config: {:?}", cfg);

    Ok(cfg)
}

/// Builds a config from any key lookup, so tests don't touch the process env.
pub fn from_lookup<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let number = |key: &str, default: u64| var(key).and_then(|v| v.parse().ok()).unwrap_or(default);

    let rpc_url = var("RPC_URL")
        .or_else(|| var("RPC_HTTP_URL")) // alias support
        .unwrap_or_else(|| "http://127.0.0.1:8545".to_string());

    let db_path = var("DATABASE_URL").unwrap_or_else(|| "indexer.db".to_string());
    let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
    let port = var("PORT").and_then(|v| v.parse().ok()).unwrap_or(3001);

    let allowed_origins = var("ALLOWED_ORIGINS")
        .unwrap_or_else(|| "http://localhost:3000".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let address = |key: &str| -> Result<Option<Address>> {
        var(key)
            .map(|v| v.parse::<Address>().wrap_err_with(|| format!("{} is not an address: {}", key, v)))
            .transpose()
    };
    let compliance = address("COMPLIANCE_ADDRESS")?;
    let token = address("TOKEN_ADDRESS")?;
    let oracle = address("ORACLE_ADDRESS")?;
    let dex = address("DEX_ADDRESS")?;
    let nft = address("NFT_ADDRESS")?;

    let contracts = match (compliance, token, oracle, dex) {
        (Some(compliance_address), Some(token_address), Some(oracle_address), Some(dex_address)) => {
            Some(ContractSet {
                compliance_address,
                token_address,
                oracle_address,
                dex_address,
                nft_address: nft,
            })
        }
        (None, None, None, None) => None,
        _ => {
            return Err(eyre!(
                "COMPLIANCE_ADDRESS, TOKEN_ADDRESS, ORACLE_ADDRESS and DEX_ADDRESS must be set together"
            ))
        }
    };

    Ok(Config {
        rpc_url,
        db_path,
        host,
        port,
        allowed_origins,
        poll_interval: Duration::from_millis(number("POLL_INTERVAL_MS", 2000).max(1)),
        backfill_blocks: number("BACKFILL_BLOCKS", 500),
        max_block_range: number("MAX_BLOCK_RANGE", 2000).max(1),
        confirmations: number("CONFIRMATIONS", 0),
        rpc_timeout: Duration::from_secs(number("RPC_TIMEOUT_SECS", 10).max(1)),
        channel_capacity: number("EVENT_CHANNEL_CAPACITY", 256).max(1) as usize,
        contracts,
    })
}
