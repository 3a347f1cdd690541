use alloy::primitives::B256;
use thiserror::Error;

/// Failure talking to the node. Any variant means the chain is unavailable
/// for the current call.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("chain call timed out")]
    Timeout,

    #[error("malformed rpc response: {0}")]
    Malformed(String),

    #[error("could not decode call result: {0}")]
    Abi(#[from] alloy::sol_types::Error),
}

/// A log that could not be turned into a typed event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log has no signature topic")]
    MissingTopic,

    #[error("unrecognized event signature {topic} for {contract} contract")]
    UnknownSignature { contract: &'static str, topic: B256 },

    #[error("abi decode failed: {0}")]
    Abi(#[from] alloy::sol_types::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("corrupt value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },
}

/// Why one event's projection was dropped.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
