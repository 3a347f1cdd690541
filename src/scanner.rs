//! Catch-up scanner for the recent-activity feed.
//!
//! A scan reads token transfers and DEX trades from the blocks after the
//! caller's watermark and turns them into [`ActivityEvent`]s. [`ActivityFeed`]
//! keeps the watermark and a bounded, deduplicated window between scans.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::sol_types::SolEvent;
use chrono::Utc;
use futures_util::future::try_join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::chain::{ChainClient, LogFilter, RawLog};
use crate::contracts::{dex, token, ContractSet};
use crate::error::ChainError;
use crate::format::format_ether;
use crate::models::{ActivityEvent, ActivityKind};
use crate::parser::{self, ChainEvent, EventKind};

/// Blocks scanned on the first call, when nothing has been consumed yet.
pub const INITIAL_LOOKBACK: u64 = 500;
/// Entries kept in an activity window.
pub const WINDOW_SIZE: usize = 20;

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub lookback: u64,
    pub window: usize,
    /// Limit for every individual chain call; hitting it fails the scan.
    pub call_timeout: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            lookback: INITIAL_LOOKBACK,
            window: WINDOW_SIZE,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one successful scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBatch {
    pub events: Vec<ActivityEvent>,
    pub last_consumed_block: u64,
}

/// Inclusive block range to scan, or `None` when there is nothing new.
pub fn scan_range(last_consumed: u64, head: u64, lookback: u64) -> Option<(u64, u64)> {
    let from_block = if last_consumed == 0 {
        head.saturating_sub(lookback)
    } else {
        last_consumed.saturating_add(1)
    };
    (from_block <= head).then_some((from_block, head))
}

async fn timed<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, ChainError>>,
) -> Result<T, ChainError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ChainError::Timeout)?
}

/// Scan the blocks after `last_consumed`.
///
/// Any chain failure fails the whole scan; the caller keeps its watermark.
pub async fn scan(
    chain: &dyn ChainClient,
    contracts: &ContractSet,
    last_consumed: u64,
    settings: &ScanSettings,
) -> Result<ScanBatch, ChainError> {
    let limit = settings.call_timeout;
    let head = timed(limit, chain.block_number()).await?;

    let Some((from_block, to_block)) = scan_range(last_consumed, head, settings.lookback) else {
        return Ok(ScanBatch {
            events: Vec::new(),
            last_consumed_block: last_consumed,
        });
    };

    let filter = |address: Address, topic0| LogFilter {
        address,
        topic0: Some(topic0),
        from_block,
        to_block,
    };
    let (transfers, buys, sells) = tokio::try_join!(
        timed(
            limit,
            chain.get_logs(filter(contracts.token_address, token::Transfer::SIGNATURE_HASH))
        ),
        timed(
            limit,
            chain.get_logs(filter(contracts.dex_address, dex::TokenPurchased::SIGNATURE_HASH))
        ),
        timed(
            limit,
            chain.get_logs(filter(contracts.dex_address, dex::TokenSold::SIGNATURE_HASH))
        ),
    )?;

    let logs: Vec<&RawLog> = transfers.iter().chain(&buys).chain(&sells).collect();
    let timestamps = block_timestamps(chain, logs.iter().map(|log| log.block_number), limit).await?;
    let now = Utc::now().timestamp_millis();

    let mut events = Vec::new();
    for log in logs {
        let event = match parser::decode(log, contracts) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping activity log {}-{}: {}", log.tx_hash, log.log_index, e);
                continue;
            }
        };
        let timestamp = timestamps.get(&event.block_number).copied().unwrap_or(now);
        if let Some(activity) = to_activity(&event, contracts.dex_address, timestamp) {
            events.push(activity);
        }
    }

    info!(
        "Activity scan {} → {}: {} new events",
        from_block,
        to_block,
        events.len()
    );
    Ok(ScanBatch {
        events,
        last_consumed_block: head,
    })
}

/// Timestamps (millis) of the distinct blocks touched, one lookup per block.
async fn block_timestamps(
    chain: &dyn ChainClient,
    blocks: impl Iterator<Item = u64>,
    limit: Duration,
) -> Result<HashMap<u64, i64>, ChainError> {
    let distinct: BTreeSet<u64> = blocks.collect();
    let lookups = distinct.into_iter().map(|number| async move {
        let secs = timed(limit, chain.block_timestamp(number)).await?;
        Ok::<_, ChainError>((number, secs))
    });
    let resolved = try_join_all(lookups).await?;

    Ok(resolved
        .into_iter()
        .filter_map(|(number, secs)| secs.map(|s| (number, (s as i64).saturating_mul(1000))))
        .collect())
}

/// Activity entry for `event`, if it is one the feed shows.
///
/// Transfers touching the DEX are the token leg of a trade that already
/// shows up as a buy or sell, so they are left out.
fn to_activity(event: &ChainEvent, dex_address: Address, timestamp: i64) -> Option<ActivityEvent> {
    let (kind, from, to, amount) = match &event.kind {
        EventKind::Transfer { from, to, value } => {
            if *from == dex_address || *to == dex_address {
                return None;
            }
            let kind = if *from == Address::ZERO {
                ActivityKind::Mint
            } else {
                ActivityKind::Transfer
            };
            (kind, *from, *to, *value)
        }
        EventKind::TokenPurchased { buyer, amount } => (ActivityKind::Buy, *buyer, dex_address, *amount),
        EventKind::TokenSold { seller, amount } => (ActivityKind::Sell, *seller, dex_address, *amount),
        _ => return None,
    };

    Some(ActivityEvent {
        id: event.id(),
        kind,
        from,
        to,
        amount: format_ether(amount),
        timestamp,
        tx_hash: event.tx_hash,
        block_number: event.block_number,
        log_index: event.log_index,
    })
}

/// Merge freshly scanned events into `window`: dedupe by id, newest first,
/// keep at most `cap`.
pub fn merge(incoming: Vec<ActivityEvent>, window: &[ActivityEvent], cap: usize) -> Vec<ActivityEvent> {
    let mut seen = HashSet::new();
    let mut merged: Vec<ActivityEvent> = incoming
        .into_iter()
        .chain(window.iter().cloned())
        .filter(|event| seen.insert(event.id.clone()))
        .collect();

    merged.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then(b.block_number.cmp(&a.block_number))
            .then(b.log_index.cmp(&a.log_index))
    });
    merged.truncate(cap);
    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Connected,
    Disconnected,
}

/// One client's activity timeline.
///
/// `refresh` takes `&mut self`, so only one scan per feed can be in flight.
#[derive(Debug, Clone)]
pub struct ActivityFeed {
    contracts: ContractSet,
    settings: ScanSettings,
    last_consumed_block: u64,
    window: Vec<ActivityEvent>,
    status: FeedStatus,
}

impl ActivityFeed {
    pub fn new(contracts: ContractSet, settings: ScanSettings) -> Self {
        Self {
            contracts,
            settings,
            last_consumed_block: 0,
            window: Vec::new(),
            status: FeedStatus::Disconnected,
        }
    }

    /// Run one scan and fold it into the window. Returns how many events the
    /// scan produced. On failure the feed goes `Disconnected` and keeps its
    /// watermark and window.
    pub async fn refresh(&mut self, chain: &dyn ChainClient) -> Result<usize, ChainError> {
        match scan(chain, &self.contracts, self.last_consumed_block, &self.settings).await {
            Ok(batch) => {
                let found = batch.events.len();
                if found > 0 {
                    self.window = merge(batch.events, &self.window, self.settings.window);
                }
                self.last_consumed_block = self.last_consumed_block.max(batch.last_consumed_block);
                self.status = FeedStatus::Connected;
                Ok(found)
            }
            Err(e) => {
                warn!("Live activity fetch error: {}", e);
                self.status = FeedStatus::Disconnected;
                Err(e)
            }
        }
    }

    pub fn window(&self) -> &[ActivityEvent] {
        &self.window
    }

    pub fn last_consumed_block(&self) -> u64 {
        self.last_consumed_block
    }

    pub fn status(&self) -> FeedStatus {
        self.status
    }
}
