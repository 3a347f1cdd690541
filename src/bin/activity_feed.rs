//! Polls the chain for recent token activity and prints the rolling window.

use std::time::Duration;

use anyhow::{anyhow, Context};
use asset_indexer::config;
use asset_indexer::rpc::RpcClient;
use asset_indexer::scanner::{ActivityFeed, FeedStatus};
use chrono::DateTime;

const REFRESH_EVERY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load().map_err(|e| anyhow!("{:#}", e))?;
    let contracts = cfg
        .contracts
        .context("set COMPLIANCE_ADDRESS, TOKEN_ADDRESS, ORACLE_ADDRESS and DEX_ADDRESS")?;

    let client = RpcClient::new(cfg.rpc_url.clone(), cfg.rpc_timeout)?;
    let mut feed = ActivityFeed::new(contracts, cfg.scan_settings());
    println!("Watching token activity via {}", cfg.rpc_url);

    let mut ticker = tokio::time::interval(REFRESH_EVERY);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        match feed.refresh(&client).await {
            Ok(0) => continue,
            Ok(found) => println!(
                "[connected] {} new events, up to block {}",
                found,
                feed.last_consumed_block()
            ),
            Err(e) => {
                eprintln!("[disconnected] {}", e);
                continue;
            }
        }

        for event in feed.window() {
            let when = DateTime::from_timestamp_millis(event.timestamp)
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default();
            println!(
                "  {} | {} | {} -> {} | {} | {}",
                when,
                serde_json::to_string(&event.kind)?.trim_matches('"'),
                event.from,
                event.to,
                event.amount,
                event.id
            );
        }
    }

    if feed.status() == FeedStatus::Connected {
        println!("Stopped at block {}", feed.last_consumed_block());
    }
    Ok(())
}
