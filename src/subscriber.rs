//! Live subscriber.
//!
//! Every monitored contract gets a producer that polls the node for that
//! contract's logs and pushes them, in chain order, into a bounded channel,
//! and a single consumer that applies them one at a time. Per-contract order
//! is therefore the channel order; different contracts run concurrently.
//!
//! The first poll starts `backfill_blocks` behind the head, which replays the
//! recent backlog before following new blocks.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use alloy::primitives::Address;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, LogFilter, RawLog};
use crate::contracts::{ContractKind, ContractSet};
use crate::db::Store;
use crate::error::ChainError;
use crate::projector::Projector;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SubscriberState {
    Uninitialized,
    Listening,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SubscriberSettings {
    pub poll_interval: Duration,
    pub backfill_blocks: u64,
    pub max_block_range: u64,
    pub confirmations: u64,
    pub channel_capacity: usize,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            backfill_blocks: 500,
            max_block_range: 2000,
            confirmations: 0,
            channel_capacity: 256,
        }
    }
}

/// Running subscriber: the contracts it follows and its published state.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    contracts: ContractSet,
    state: watch::Receiver<SubscriberState>,
}

impl SubscriberHandle {
    pub fn contracts(&self) -> ContractSet {
        self.contracts
    }

    pub fn state(&self) -> SubscriberState {
        self.state.borrow().clone()
    }
}

/// Subscriber for one fixed set of contracts.
pub struct LiveSubscriber {
    chain: Arc<dyn ChainClient>,
    store: Store,
    contracts: ContractSet,
    settings: SubscriberSettings,
}

impl LiveSubscriber {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Store,
        contracts: ContractSet,
        settings: SubscriberSettings,
    ) -> Self {
        Self {
            chain,
            store,
            contracts,
            settings,
        }
    }

    /// Spawn producers, consumers and the supervisor. Must be called from
    /// within a tokio runtime.
    pub fn start(self) -> SubscriberHandle {
        let (state_tx, state_rx) = watch::channel(SubscriberState::Listening);
        let projector = Projector::new(Arc::clone(&self.chain), self.store.clone(), self.contracts);
        let mut tasks = JoinSet::new();

        for (kind, address) in self.contracts.monitored() {
            let (sender, receiver) = mpsc::channel(self.settings.channel_capacity);
            let feed = LogFeed {
                chain: Arc::clone(&self.chain),
                kind,
                address,
                settings: self.settings.clone(),
                sender,
            };
            tasks.spawn(feed.run());
            tasks.spawn(consume(kind, receiver, projector.clone()));
        }

        info!(
            "Listeners attached for {} contracts: {:?}",
            self.contracts.monitored().len(),
            self.contracts
        );
        tokio::spawn(supervise(tasks, state_tx));

        SubscriberHandle {
            contracts: self.contracts,
            state: state_rx,
        }
    }
}

/// Workers never finish on their own; the first one that does (or panics)
/// fails the whole subscriber.
async fn supervise(mut tasks: JoinSet<()>, state: watch::Sender<SubscriberState>) {
    let reason = match tasks.join_next().await {
        Some(Ok(())) => "event worker exited".to_string(),
        Some(Err(e)) => format!("event worker crashed: {}", e),
        None => "no contracts to follow".to_string(),
    };
    error!("Live subscriber failed: {}", reason);
    state.send_replace(SubscriberState::Failed(reason));
    tasks.shutdown().await;
}

async fn consume(kind: ContractKind, mut receiver: mpsc::Receiver<RawLog>, projector: Projector) {
    while let Some(log) = receiver.recv().await {
        let outcome = projector.handle_log(&log).await;
        debug!(
            "{} log {}-{} -> {:?}",
            kind.as_str(),
            log.tx_hash,
            log.log_index,
            outcome
        );
    }
    warn!("{} event queue closed", kind.as_str());
}

/// Producer side of one contract's queue.
struct LogFeed {
    chain: Arc<dyn ChainClient>,
    kind: ContractKind,
    address: Address,
    settings: SubscriberSettings,
    sender: mpsc::Sender<RawLog>,
}

impl LogFeed {
    async fn run(self) {
        let mut next_block = loop {
            match self.chain.block_number().await {
                Ok(head) => {
                    let start = head
                        .saturating_sub(self.settings.confirmations)
                        .saturating_sub(self.settings.backfill_blocks);
                    info!(
                        "{} feed: replaying from block {} (head {})",
                        self.kind.as_str(),
                        start,
                        head
                    );
                    break start;
                }
                Err(e) => {
                    warn!("{} feed: head unavailable: {}", self.kind.as_str(), e);
                    sleep(self.settings.poll_interval).await;
                }
            }
        };

        loop {
            match self.poll_once(&mut next_block).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => warn!(
                    "{} feed: poll failed at block {}: {}",
                    self.kind.as_str(),
                    next_block,
                    e
                ),
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    /// Fetch everything from `next_block` up to the confirmed head and queue
    /// it. `next_block` only moves past chunks that were fully queued.
    /// Returns `Ok(false)` once the consumer is gone.
    async fn poll_once(&self, next_block: &mut u64) -> Result<bool, ChainError> {
        let head = self.chain.block_number().await?;
        let target = head.saturating_sub(self.settings.confirmations);

        while let Some((from_block, to_block)) =
            next_range(*next_block, target, self.settings.max_block_range)
        {
            let logs = self
                .chain
                .get_logs(LogFilter {
                    address: self.address,
                    topic0: None,
                    from_block,
                    to_block,
                })
                .await?;

            if !logs.is_empty() {
                info!(
                    "{} feed: {} logs in blocks {} → {}",
                    self.kind.as_str(),
                    logs.len(),
                    from_block,
                    to_block
                );
            }
            for log in logs {
                if self.sender.send(log).await.is_err() {
                    return Ok(false);
                }
            }
            *next_block = to_block + 1;
        }
        Ok(true)
    }
}

/// Next inclusive block range to fetch, at most `max_range` blocks wide.
fn next_range(next_block: u64, target: u64, max_range: u64) -> Option<(u64, u64)> {
    if next_block > target {
        return None;
    }
    let span = max_range.max(1) - 1;
    Some((next_block, next_block.saturating_add(span).min(target)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Started,
    AlreadyRunning,
}

/// One-time latch in front of the subscriber.
///
/// The first `start` builds a [`LiveSubscriber`] for the given contracts and
/// runs it for the rest of the process. Every later call is a no-op, whatever
/// addresses it carries.
pub struct Bootstrap {
    chain: Arc<dyn ChainClient>,
    store: Store,
    settings: SubscriberSettings,
    handle: OnceLock<SubscriberHandle>,
}

impl Bootstrap {
    pub fn new(chain: Arc<dyn ChainClient>, store: Store, settings: SubscriberSettings) -> Self {
        Self {
            chain,
            store,
            settings,
            handle: OnceLock::new(),
        }
    }

    pub fn start(&self, contracts: ContractSet) -> BootstrapOutcome {
        let mut started = false;
        let handle = self.handle.get_or_init(|| {
            started = true;
            LiveSubscriber::new(
                Arc::clone(&self.chain),
                self.store.clone(),
                contracts,
                self.settings.clone(),
            )
            .start()
        });

        if started {
            info!("Contracts initialized: {:?}", contracts);
            BootstrapOutcome::Started
        } else {
            if handle.contracts() != contracts {
                warn!(
                    "Ignoring bootstrap with different contracts {:?}; already following {:?}",
                    contracts,
                    handle.contracts()
                );
            }
            BootstrapOutcome::AlreadyRunning
        }
    }

    pub fn state(&self) -> SubscriberState {
        self.handle
            .get()
            .map_or(SubscriberState::Uninitialized, SubscriberHandle::state)
    }

    pub fn contracts(&self) -> Option<ContractSet> {
        self.handle.get().map(SubscriberHandle::contracts)
    }
}
