// src/models.rs
use alloy::primitives::{Address, B256};
use serde::Serialize;

/// Compliance status of an account. Both flags are kept as emitted; the
/// registry may set them together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub address: String,
    pub is_whitelisted: bool,
    pub is_blacklisted: bool,
}

/// Token balance of an account, always a copy of the on-chain `balanceOf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub address: String,
    pub symbol: String,
    pub balance: String, // base-10 wei
}

/// Latest oracle price of an asset (last write wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPrice {
    pub symbol: String,
    pub price: String,     // base-10 wei
    pub price_eth: String, // decimal ether
}

/// One DEX purchase or sale. Exactly one of `buyer`/`seller` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trade {
    pub id: i64,
    pub buyer: Option<String>,
    pub seller: Option<String>,
    pub amount: String,
    pub price: Option<String>,
    pub timestamp: i64, // unix millis
}

/// A trade as produced by the subscriber, before it gets its sequence id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrade {
    pub buyer: Option<Address>,
    pub seller: Option<Address>,
    pub amount: String,
    pub timestamp: i64,
}

/// Marketplace view of one NFT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Nft {
    pub token_id: String,
    pub owner: String,
    pub uri: String,
    pub listed: bool,
    pub seller: Option<String>,
    pub price: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Mint,
    Buy,
    Sell,
    Transfer,
}

/// Entry of a client's recent-activity window. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// `txHash-logIndex`
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub from: Address,
    pub to: Address,
    pub amount: String, // decimal ether
    pub timestamp: i64, // unix millis
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
}
