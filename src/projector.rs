//! Projection rules: one typed event in, idempotent store writes out.
//!
//! Balances and NFT rows are never computed from event payloads. Each event
//! only says *which* rows are stale; the new value is read from the chain.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, RawLog};
use crate::contracts::{self, ContractSet};
use crate::db::{self, address_key, Store};
use crate::error::ProjectionError;
use crate::models::{NewTrade, Nft};
use crate::parser::{self, ChainEvent, EventKind};

/// What happened to one raw log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    Applied,
    /// Emitted by a contract outside the monitored set.
    Ignored,
    /// Decode or projection failed; the event has no effect.
    Dropped,
}

#[derive(Clone)]
pub struct Projector {
    chain: Arc<dyn ChainClient>,
    store: Store,
    contracts: ContractSet,
}

impl Projector {
    pub fn new(chain: Arc<dyn ChainClient>, store: Store, contracts: ContractSet) -> Self {
        Self {
            chain,
            store,
            contracts,
        }
    }

    /// Decode and apply one log. Never fails: errors are logged and the log
    /// is dropped so the caller can move on to the next one.
    pub async fn handle_log(&self, log: &RawLog) -> LogOutcome {
        let event = match parser::decode(log, &self.contracts) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("Ignoring log from unmonitored address {}", log.address);
                return LogOutcome::Ignored;
            }
            Err(e) => {
                warn!(
                    "Dropping undecodable log {}-{} (block {}): {}",
                    log.tx_hash, log.log_index, log.block_number, e
                );
                return LogOutcome::Dropped;
            }
        };

        match self.apply(&event).await {
            Ok(()) => LogOutcome::Applied,
            Err(e) => {
                error!(
                    "Dropping {} {} (block {}): {}",
                    event.kind.name(),
                    event.id(),
                    event.block_number,
                    e
                );
                LogOutcome::Dropped
            }
        }
    }

    pub async fn apply(&self, event: &ChainEvent) -> Result<(), ProjectionError> {
        match &event.kind {
            EventKind::AddedToWhitelist { account } => {
                info!("Whitelist: {}", account);
                let key = address_key(*account);
                self.store.run(move |c| db::set_whitelisted(c, &key, true)).await?;
            }
            EventKind::RemovedFromWhitelist { account } => {
                info!("Removed whitelist: {}", account);
                let key = address_key(*account);
                self.store.run(move |c| db::set_whitelisted(c, &key, false)).await?;
            }
            EventKind::AddedToBlacklist { account } => {
                info!("Blacklist: {}", account);
                let key = address_key(*account);
                self.store.run(move |c| db::set_blacklisted(c, &key, true)).await?;
            }
            EventKind::RemovedFromBlacklist { account } => {
                info!("Removed blacklist: {}", account);
                let key = address_key(*account);
                self.store.run(move |c| db::set_blacklisted(c, &key, false)).await?;
            }
            EventKind::Transfer { from, to, value } => {
                info!("Transfer: {} -> {} value {}", from, to, value);
                self.refresh_balances(*from, *to).await?;
            }
            EventKind::PriceUpdated { symbol, price } => {
                info!("Price update: {} = {}", symbol, price);
                let (symbol, price) = (symbol.clone(), *price);
                self.store.run(move |c| db::upsert_price(c, &symbol, price)).await?;
            }
            EventKind::TokenPurchased { buyer, amount } => {
                info!("Trade buy: {} {}", buyer, amount);
                self.record_trade(Some(*buyer), None, *amount).await?;
            }
            EventKind::TokenSold { seller, amount } => {
                info!("Trade sell: {} {}", seller, amount);
                self.record_trade(None, Some(*seller), *amount).await?;
            }
            EventKind::NftTransfer { token_id, .. }
            | EventKind::NftMinted { token_id, .. }
            | EventKind::NftListed { token_id, .. }
            | EventKind::NftSold { token_id, .. }
            | EventKind::NftCancelled { token_id, .. } => {
                info!("{}: NFT #{}", event.kind.name(), token_id);
                self.refresh_nft(*token_id).await?;
            }
            EventKind::OwnershipTransferred {
                previous_owner,
                new_owner,
            } => {
                info!(
                    "{} contract ownership: {} -> {}",
                    event.contract.as_str(),
                    previous_owner,
                    new_owner
                );
            }
        }
        Ok(())
    }

    /// Re-read `balanceOf` for both endpoints of a transfer. The zero address
    /// (mint/burn side) is skipped.
    async fn refresh_balances(&self, from: Address, to: Address) -> Result<(), ProjectionError> {
        let token = self.contracts.token_address;
        let symbol = contracts::symbol(self.chain.as_ref(), token).await?;

        let mut holders = vec![from, to];
        holders.retain(|holder| *holder != Address::ZERO);
        holders.dedup();

        for holder in holders {
            let balance = contracts::balance_of(self.chain.as_ref(), token, holder).await?;
            let key = address_key(holder);
            let symbol = symbol.clone();
            self.store
                .run(move |c| db::upsert_balance(c, &key, &symbol, balance))
                .await?;
        }
        Ok(())
    }

    async fn record_trade(
        &self,
        buyer: Option<Address>,
        seller: Option<Address>,
        amount: U256,
    ) -> Result<(), ProjectionError> {
        let trade = NewTrade {
            buyer,
            seller,
            amount: amount.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        };
        self.store.run(move |c| db::insert_trade(c, &trade)).await?;
        Ok(())
    }

    async fn refresh_nft(&self, token_id: U256) -> Result<(), ProjectionError> {
        let Some(nft_address) = self.contracts.nft_address else {
            return Ok(());
        };
        let chain = self.chain.as_ref();
        let owner = contracts::owner_of(chain, nft_address, token_id).await?;
        let uri = contracts::token_uri(chain, nft_address, token_id).await?;
        let listing = contracts::get_listing(chain, nft_address, token_id).await?;

        let nft = Nft {
            token_id: token_id.to_string(),
            owner: address_key(owner),
            uri,
            listed: listing.active,
            seller: listing.active.then(|| address_key(listing.seller)),
            price: listing.active.then(|| listing.price.to_string()),
        };
        self.store.run(move |c| db::upsert_nft(c, &nft)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{log_of, MockChain};
    use crate::contracts::{compliance, dex, nft, oracle, token};
    use alloy::primitives::B256;

    struct Harness {
        chain: Arc<MockChain>,
        store: Store,
        contracts: ContractSet,
        projector: Projector,
    }

    fn harness() -> Harness {
        let chain = Arc::new(MockChain::new());
        let store = Store::in_memory().unwrap();
        let contracts = ContractSet {
            compliance_address: Address::repeat_byte(0x01),
            token_address: Address::repeat_byte(0x02),
            oracle_address: Address::repeat_byte(0x03),
            dex_address: Address::repeat_byte(0x04),
            nft_address: Some(Address::repeat_byte(0x05)),
        };
        chain.set_symbol(contracts.token_address, "GLD");
        let projector = Projector::new(chain.clone(), store.clone(), contracts);
        Harness {
            chain,
            store,
            contracts,
            projector,
        }
    }

    fn transfer(h: &Harness, from: Address, to: Address, value: u64, log_index: u64) -> RawLog {
        let event = token::Transfer {
            from,
            to,
            value: U256::from(value),
        };
        log_of(h.contracts.token_address, &event, 10, B256::repeat_byte(0x11), log_index)
    }

    async fn balance(h: &Harness, holder: Address) -> Option<String> {
        let key = address_key(holder);
        let balances = h.store.run(move |c| db::get_balances(c, &key)).await.unwrap();
        balances.into_iter().find(|b| b.symbol == "GLD").map(|b| b.balance)
    }

    #[tokio::test]
    async fn whitelist_is_idempotent() {
        let h = harness();
        let account = Address::repeat_byte(0xaa);
        let log = log_of(
            h.contracts.compliance_address,
            &compliance::AddedToWhitelist { account },
            1,
            B256::ZERO,
            0,
        );
        assert_eq!(h.projector.handle_log(&log).await, LogOutcome::Applied);
        let key = address_key(account);
        let k = key.clone();
        let once = h.store.run(move |c| db::get_user(c, &k)).await.unwrap();
        assert_eq!(h.projector.handle_log(&log).await, LogOutcome::Applied);
        let twice = h.store.run(move |c| db::get_user(c, &key)).await.unwrap();
        assert_eq!(once, twice);
        assert!(twice.unwrap().is_whitelisted);
    }

    #[tokio::test]
    async fn transfers_reconcile_to_ground_truth() {
        let h = harness();
        let (a, b) = (Address::repeat_byte(0xaa), Address::repeat_byte(0xbb));
        let token = h.contracts.token_address;

        // Chain state after mint(a, 100) and transfer(a, b, 40).
        h.chain.set_balance(token, a, U256::from(60u64));
        h.chain.set_balance(token, b, U256::from(40u64));

        let mint = transfer(&h, Address::ZERO, a, 100, 0);
        let send = transfer(&h, a, b, 40, 1);

        // Out of order and duplicated delivery converges all the same.
        for log in [&send, &mint, &send, &mint] {
            assert_eq!(h.projector.handle_log(log).await, LogOutcome::Applied);
        }
        assert_eq!(balance(&h, a).await.as_deref(), Some("60"));
        assert_eq!(balance(&h, b).await.as_deref(), Some("40"));
        assert_eq!(balance(&h, Address::ZERO).await, None);
    }

    #[tokio::test]
    async fn price_update_overwrites_asset_price() {
        let h = harness();
        let log = log_of(
            h.contracts.oracle_address,
            &oracle::PriceUpdated {
                symbol: "GLD".into(),
                price: U256::from(10_000_000_000_000_000u64),
            },
            1,
            B256::ZERO,
            0,
        );
        assert_eq!(h.projector.handle_log(&log).await, LogOutcome::Applied);
        let prices = h.store.run(db::get_prices).await.unwrap();
        assert_eq!(prices[0].price_eth, "0.01");
        let trades = h.store.run(|c| db::recent_trades(c, 10)).await.unwrap();
        assert!(trades.is_empty());
    }

    #[tokio::test]
    async fn dex_events_append_trades() {
        let h = harness();
        let trader = Address::repeat_byte(0xcc);
        let buy = log_of(
            h.contracts.dex_address,
            &dex::TokenPurchased {
                buyer: trader,
                amount: U256::from(3u64),
            },
            1,
            B256::ZERO,
            0,
        );
        let sell = log_of(
            h.contracts.dex_address,
            &dex::TokenSold {
                seller: trader,
                amount: U256::from(2u64),
            },
            1,
            B256::ZERO,
            1,
        );
        h.projector.handle_log(&buy).await;
        h.projector.handle_log(&sell).await;

        let trades = h.store.run(|c| db::recent_trades(c, 10)).await.unwrap();
        assert_eq!(trades.len(), 2);
        let bought = trades.iter().find(|t| t.buyer.is_some()).unwrap();
        assert_eq!(bought.amount, "3");
        assert_eq!(bought.seller, None);
        let sold = trades.iter().find(|t| t.seller.is_some()).unwrap();
        assert_eq!(sold.amount, "2");
    }

    #[tokio::test]
    async fn nft_events_reread_marketplace_state() {
        let h = harness();
        let owner = Address::repeat_byte(0xdd);
        let id = U256::from(1u64);
        h.chain.set_nft(id, owner, "Mona Lisa #1 - Analysis");
        h.chain.set_listing(id, owner, U256::from(5u64), true);

        let listed = log_of(
            Address::repeat_byte(0x05),
            &nft::NFTListed {
                tokenId: id,
                seller: owner,
                price: U256::from(999u64),
            },
            1,
            B256::ZERO,
            0,
        );
        assert_eq!(h.projector.handle_log(&listed).await, LogOutcome::Applied);

        let row = h.store.run(|c| db::get_nft(c, "1")).await.unwrap().unwrap();
        assert!(row.listed);
        // Price comes from getListing, not from the event payload.
        assert_eq!(row.price.as_deref(), Some("5"));
        assert_eq!(row.uri, "Mona Lisa #1 - Analysis");
    }

    #[tokio::test]
    async fn chain_failure_drops_only_that_event() {
        let h = harness();
        let a = Address::repeat_byte(0xaa);
        h.chain.set_offline(true);
        let log = transfer(&h, Address::ZERO, a, 1, 0);
        assert_eq!(h.projector.handle_log(&log).await, LogOutcome::Dropped);

        h.chain.set_offline(false);
        h.chain.set_balance(h.contracts.token_address, a, U256::from(1u64));
        assert_eq!(h.projector.handle_log(&log).await, LogOutcome::Applied);
        assert_eq!(balance(&h, a).await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn unknown_logs_are_ignored_or_dropped() {
        let h = harness();
        let stranger = log_of(
            Address::repeat_byte(0x99),
            &compliance::AddedToWhitelist {
                account: Address::repeat_byte(0xaa),
            },
            1,
            B256::ZERO,
            0,
        );
        assert_eq!(h.projector.handle_log(&stranger).await, LogOutcome::Ignored);

        let wrong_abi = log_of(
            h.contracts.oracle_address,
            &compliance::AddedToWhitelist {
                account: Address::repeat_byte(0xaa),
            },
            1,
            B256::ZERO,
            0,
        );
        assert_eq!(h.projector.handle_log(&wrong_abi).await, LogOutcome::Dropped);
    }
}
