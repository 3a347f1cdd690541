//! Chain access seam.
//!
//! Everything the indexer needs from a node goes through [`ChainClient`]:
//! block height, filtered logs, block timestamps and read-only calls. The
//! JSON-RPC implementation lives in `rpc.rs`; tests use the in-memory mock
//! below.

use alloy::primitives::{Address, Bytes, B256};
use futures_util::future::BoxFuture;

use crate::error::ChainError;

/// `eth_getLogs` filter over a single contract address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    /// Event signature (topic0). `None` matches every event of the contract.
    pub topic0: Option<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

/// A raw log entry as emitted by the node, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

pub trait ChainClient: Send + Sync + 'static {
    /// Current block height.
    fn block_number(&self) -> BoxFuture<'_, Result<u64, ChainError>>;

    /// Logs matching `filter`, in chain order.
    fn get_logs(&self, filter: LogFilter) -> BoxFuture<'_, Result<Vec<RawLog>, ChainError>>;

    /// Timestamp (unix seconds) of block `number`, `None` if the node does not know it.
    fn block_timestamp(&self, number: u64) -> BoxFuture<'_, Result<Option<u64>, ChainError>>;

    /// Read-only `eth_call` against the latest block.
    fn call(&self, to: Address, data: Bytes) -> BoxFuture<'_, Result<Bytes, ChainError>>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use alloy::primitives::{Address, Bytes, B256, U256};
    use alloy::sol_types::{SolCall, SolEvent, SolValue};
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;

    use super::{ChainClient, LogFilter, RawLog};
    use crate::contracts::{nft, oracle, token};
    use crate::error::ChainError;

    #[derive(Default)]
    struct MockState {
        head: u64,
        logs: Vec<RawLog>,
        timestamps: HashMap<u64, u64>,
        balances: HashMap<(Address, Address), U256>,
        symbols: HashMap<Address, String>,
        prices: HashMap<String, U256>,
        owners: HashMap<U256, Address>,
        uris: HashMap<U256, String>,
        listings: HashMap<U256, (Address, U256, bool)>,
        offline: bool,
        timestamp_queries: usize,
        log_queries: Vec<LogFilter>,
    }

    /// In-memory node. Every answer reflects whatever the test put in.
    #[derive(Default)]
    pub struct MockChain {
        state: Mutex<MockState>,
    }

    /// Encode `event` the way a node would return it.
    pub fn log_of<E: SolEvent>(
        address: Address,
        event: &E,
        block_number: u64,
        tx_hash: B256,
        log_index: u64,
    ) -> RawLog {
        let encoded = event.encode_log_data();
        RawLog {
            address,
            topics: encoded.topics().to_vec(),
            data: encoded.data.clone(),
            block_number,
            tx_hash,
            log_index,
        }
    }

    impl MockChain {
        pub fn new() -> Self {
            Self::default()
        }

        fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
            let mut state = self.state.lock().unwrap();
            f(&mut state)
        }

        pub fn set_head(&self, head: u64) {
            self.with(|s| s.head = head);
        }

        pub fn push_log(&self, log: RawLog) {
            self.with(|s| s.logs.push(log));
        }

        pub fn set_timestamp(&self, block: u64, secs: u64) {
            self.with(|s| s.timestamps.insert(block, secs));
        }

        pub fn set_balance(&self, token: Address, account: Address, balance: U256) {
            self.with(|s| s.balances.insert((token, account), balance));
        }

        pub fn set_symbol(&self, token: Address, symbol: &str) {
            self.with(|s| s.symbols.insert(token, symbol.to_string()));
        }

        pub fn set_price(&self, symbol: &str, price: U256) {
            self.with(|s| s.prices.insert(symbol.to_string(), price));
        }

        pub fn set_nft(&self, token_id: U256, owner: Address, uri: &str) {
            self.with(|s| {
                s.owners.insert(token_id, owner);
                s.uris.insert(token_id, uri.to_string());
            });
        }

        pub fn set_listing(&self, token_id: U256, seller: Address, price: U256, active: bool) {
            self.with(|s| s.listings.insert(token_id, (seller, price, active)));
        }

        pub fn set_offline(&self, offline: bool) {
            self.with(|s| s.offline = offline);
        }

        pub fn timestamp_queries(&self) -> usize {
            self.with(|s| s.timestamp_queries)
        }

        pub fn log_queries(&self) -> Vec<LogFilter> {
            self.with(|s| s.log_queries.clone())
        }

        fn online(state: &MockState) -> Result<(), ChainError> {
            if state.offline {
                return Err(ChainError::Rpc {
                    code: -32000,
                    message: "node unreachable".into(),
                });
            }
            Ok(())
        }
    }

    fn answer(state: &MockState, to: Address, data: &[u8]) -> Result<Bytes, ChainError> {
        let selector = data
            .get(..4)
            .ok_or_else(|| ChainError::Malformed("calldata shorter than a selector".into()))?;

        let encoded = if selector == token::balanceOfCall::SELECTOR.as_slice() {
            let call = token::balanceOfCall::abi_decode(data)?;
            let balance = state
                .balances
                .get(&(to, call.account))
                .copied()
                .unwrap_or_default();
            balance.abi_encode()
        } else if selector == token::symbolCall::SELECTOR.as_slice() {
            state.symbols.get(&to).cloned().unwrap_or_default().abi_encode()
        } else if selector == oracle::getPriceCall::SELECTOR.as_slice() {
            let call = oracle::getPriceCall::abi_decode(data)?;
            state
                .prices
                .get(&call.symbol)
                .copied()
                .unwrap_or_default()
                .abi_encode()
        } else if selector == nft::ownerOfCall::SELECTOR.as_slice() {
            let call = nft::ownerOfCall::abi_decode(data)?;
            state
                .owners
                .get(&call.tokenId)
                .copied()
                .unwrap_or_default()
                .abi_encode()
        } else if selector == nft::tokenURICall::SELECTOR.as_slice() {
            let call = nft::tokenURICall::abi_decode(data)?;
            state.uris.get(&call.tokenId).cloned().unwrap_or_default().abi_encode()
        } else if selector == nft::getListingCall::SELECTOR.as_slice() {
            let call = nft::getListingCall::abi_decode(data)?;
            state
                .listings
                .get(&call.tokenId)
                .copied()
                .unwrap_or((Address::ZERO, U256::ZERO, false))
                .abi_encode()
        } else {
            return Err(ChainError::Rpc {
                code: 3,
                message: "execution reverted".into(),
            });
        };
        Ok(encoded.into())
    }

    impl ChainClient for MockChain {
        fn block_number(&self) -> BoxFuture<'_, Result<u64, ChainError>> {
            let result = self.with(|s| Self::online(s).map(|_| s.head));
            async move { result }.boxed()
        }

        fn get_logs(&self, filter: LogFilter) -> BoxFuture<'_, Result<Vec<RawLog>, ChainError>> {
            let result = self.with(|s| {
                Self::online(s)?;
                s.log_queries.push(filter.clone());
                let mut logs: Vec<RawLog> = s
                    .logs
                    .iter()
                    .filter(|log| log.address == filter.address)
                    .filter(|log| {
                        filter
                            .topic0
                            .map_or(true, |topic| log.topics.first() == Some(&topic))
                    })
                    .filter(|log| {
                        log.block_number >= filter.from_block && log.block_number <= filter.to_block
                    })
                    .cloned()
                    .collect();
                logs.sort_by_key(|log| (log.block_number, log.log_index));
                Ok(logs)
            });
            async move { result }.boxed()
        }

        fn block_timestamp(&self, number: u64) -> BoxFuture<'_, Result<Option<u64>, ChainError>> {
            let result = self.with(|s| {
                Self::online(s)?;
                s.timestamp_queries += 1;
                Ok(s.timestamps.get(&number).copied())
            });
            async move { result }.boxed()
        }

        fn call(&self, to: Address, data: Bytes) -> BoxFuture<'_, Result<Bytes, ChainError>> {
            let result = self.with(|s| {
                Self::online(s)?;
                answer(s, to, &data)
            });
            async move { result }.boxed()
        }
    }
}
