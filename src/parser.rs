// src/parser.rs
use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;

use crate::chain::RawLog;
use crate::contracts::{compliance, dex, nft, oracle, ownable, token, ContractKind, ContractSet};
use crate::error::DecodeError;

/// A decoded log with its chain coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub contract: ContractKind,
    pub address: Address,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub kind: EventKind,
}

impl ChainEvent {
    /// Identity of the log on chain, `txHash-logIndex`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.tx_hash, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    AddedToWhitelist { account: Address },
    RemovedFromWhitelist { account: Address },
    AddedToBlacklist { account: Address },
    RemovedFromBlacklist { account: Address },
    Transfer { from: Address, to: Address, value: U256 },
    PriceUpdated { symbol: String, price: U256 },
    TokenPurchased { buyer: Address, amount: U256 },
    TokenSold { seller: Address, amount: U256 },
    NftTransfer { from: Address, to: Address, token_id: U256 },
    NftMinted { token_id: U256, owner: Address, uri: String },
    NftListed { token_id: U256, seller: Address, price: U256 },
    NftSold { token_id: U256, seller: Address, buyer: Address, price: U256 },
    NftCancelled { token_id: U256, seller: Address },
    OwnershipTransferred { previous_owner: Address, new_owner: Address },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::AddedToWhitelist { .. } => "AddedToWhitelist",
            EventKind::RemovedFromWhitelist { .. } => "RemovedFromWhitelist",
            EventKind::AddedToBlacklist { .. } => "AddedToBlacklist",
            EventKind::RemovedFromBlacklist { .. } => "RemovedFromBlacklist",
            EventKind::Transfer { .. } | EventKind::NftTransfer { .. } => "Transfer",
            EventKind::PriceUpdated { .. } => "PriceUpdated",
            EventKind::TokenPurchased { .. } => "TokenPurchased",
            EventKind::TokenSold { .. } => "TokenSold",
            EventKind::NftMinted { .. } => "NFTMinted",
            EventKind::NftListed { .. } => "NFTListed",
            EventKind::NftSold { .. } => "NFTSold",
            EventKind::NftCancelled { .. } => "NFTCancelled",
            EventKind::OwnershipTransferred { .. } => "OwnershipTransferred",
        }
    }
}

fn decode_as<E: SolEvent>(log: &RawLog) -> Result<E, DecodeError> {
    Ok(E::decode_raw_log(log.topics.iter().copied(), &log.data)?)
}

/// Decode a raw log emitted by one of `contracts`.
///
/// Logs from addresses outside the set yield `Ok(None)`. A log from a known
/// contract whose signature is not part of that contract's ABI is a
/// `DecodeError`.
pub fn decode(log: &RawLog, contracts: &ContractSet) -> Result<Option<ChainEvent>, DecodeError> {
    let Some(contract) = contracts.kind_of(log.address) else {
        return Ok(None);
    };
    let topic0 = *log.topics.first().ok_or(DecodeError::MissingTopic)?;

    let kind = if topic0 == ownable::OwnershipTransferred::SIGNATURE_HASH {
        let e = decode_as::<ownable::OwnershipTransferred>(log)?;
        EventKind::OwnershipTransferred {
            previous_owner: e.previousOwner,
            new_owner: e.newOwner,
        }
    } else {
        decode_for(contract, topic0, log)?
    };

    Ok(Some(ChainEvent {
        contract,
        address: log.address,
        block_number: log.block_number,
        tx_hash: log.tx_hash,
        log_index: log.log_index,
        kind,
    }))
}

fn decode_for(contract: ContractKind, topic0: B256, log: &RawLog) -> Result<EventKind, DecodeError> {
    let kind = match contract {
        ContractKind::Compliance => {
            if topic0 == compliance::AddedToWhitelist::SIGNATURE_HASH {
                let e = decode_as::<compliance::AddedToWhitelist>(log)?;
                EventKind::AddedToWhitelist { account: e.account }
            } else if topic0 == compliance::RemovedFromWhitelist::SIGNATURE_HASH {
                let e = decode_as::<compliance::RemovedFromWhitelist>(log)?;
                EventKind::RemovedFromWhitelist { account: e.account }
            } else if topic0 == compliance::AddedToBlacklist::SIGNATURE_HASH {
                let e = decode_as::<compliance::AddedToBlacklist>(log)?;
                EventKind::AddedToBlacklist { account: e.account }
            } else if topic0 == compliance::RemovedFromBlacklist::SIGNATURE_HASH {
                let e = decode_as::<compliance::RemovedFromBlacklist>(log)?;
                EventKind::RemovedFromBlacklist { account: e.account }
            } else {
                return Err(unknown(contract, topic0));
            }
        }
        ContractKind::Token => {
            if topic0 == token::Transfer::SIGNATURE_HASH {
                let e = decode_as::<token::Transfer>(log)?;
                EventKind::Transfer {
                    from: e.from,
                    to: e.to,
                    value: e.value,
                }
            } else {
                return Err(unknown(contract, topic0));
            }
        }
        ContractKind::Oracle => {
            if topic0 == oracle::PriceUpdated::SIGNATURE_HASH {
                let e = decode_as::<oracle::PriceUpdated>(log)?;
                EventKind::PriceUpdated {
                    symbol: e.symbol,
                    price: e.price,
                }
            } else {
                return Err(unknown(contract, topic0));
            }
        }
        ContractKind::Dex => {
            if topic0 == dex::TokenPurchased::SIGNATURE_HASH {
                let e = decode_as::<dex::TokenPurchased>(log)?;
                EventKind::TokenPurchased {
                    buyer: e.buyer,
                    amount: e.amount,
                }
            } else if topic0 == dex::TokenSold::SIGNATURE_HASH {
                let e = decode_as::<dex::TokenSold>(log)?;
                EventKind::TokenSold {
                    seller: e.seller,
                    amount: e.amount,
                }
            } else {
                return Err(unknown(contract, topic0));
            }
        }
        ContractKind::Nft => {
            // ERC-721 Transfer shares its signature with ERC-20 Transfer; the
            // token id is the third indexed topic.
            if topic0 == nft::Transfer::SIGNATURE_HASH {
                let e = decode_as::<nft::Transfer>(log)?;
                EventKind::NftTransfer {
                    from: e.from,
                    to: e.to,
                    token_id: e.tokenId,
                }
            } else if topic0 == nft::NFTMinted::SIGNATURE_HASH {
                let e = decode_as::<nft::NFTMinted>(log)?;
                EventKind::NftMinted {
                    token_id: e.tokenId,
                    owner: e.owner,
                    uri: e.uri,
                }
            } else if topic0 == nft::NFTListed::SIGNATURE_HASH {
                let e = decode_as::<nft::NFTListed>(log)?;
                EventKind::NftListed {
                    token_id: e.tokenId,
                    seller: e.seller,
                    price: e.price,
                }
            } else if topic0 == nft::NFTSold::SIGNATURE_HASH {
                let e = decode_as::<nft::NFTSold>(log)?;
                EventKind::NftSold {
                    token_id: e.tokenId,
                    seller: e.seller,
                    buyer: e.buyer,
                    price: e.price,
                }
            } else if topic0 == nft::NFTCancelled::SIGNATURE_HASH {
                let e = decode_as::<nft::NFTCancelled>(log)?;
                EventKind::NftCancelled {
                    token_id: e.tokenId,
                    seller: e.seller,
                }
            } else {
                return Err(unknown(contract, topic0));
            }
        }
    };
    Ok(kind)
}

fn unknown(contract: ContractKind, topic: B256) -> DecodeError {
    DecodeError::UnknownSignature {
        contract: contract.as_str(),
        topic,
    }
}
