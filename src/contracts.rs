//! Monitored contracts: their addresses, ABIs and the read calls used for
//! ground-truth reconciliation.

use alloy::primitives::{Address, U256};
use alloy::sol_types::{SolCall, SolType, SolValue};
use serde::{Deserialize, Serialize};

use crate::chain::ChainClient;
use crate::error::ChainError;

pub mod compliance {
    alloy::sol! {
        event AddedToWhitelist(address indexed account);
        event RemovedFromWhitelist(address indexed account);
        event AddedToBlacklist(address indexed account);
        event RemovedFromBlacklist(address indexed account);
    }
}

pub mod token {
    alloy::sol! {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function balanceOf(address account) external view returns (uint256);
        function symbol() external view returns (string);
    }
}

pub mod oracle {
    alloy::sol! {
        event PriceUpdated(string symbol, uint256 price);

        function getPrice(string symbol) external view returns (uint256);
    }
}

pub mod dex {
    alloy::sol! {
        event TokenPurchased(address indexed buyer, uint256 amount);
        event TokenSold(address indexed seller, uint256 amount);
    }
}

pub mod nft {
    alloy::sol! {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
        event NFTMinted(uint256 indexed tokenId, address indexed owner, string uri);
        event NFTListed(uint256 indexed tokenId, address indexed seller, uint256 price);
        event NFTSold(uint256 indexed tokenId, address indexed seller, address indexed buyer, uint256 price);
        event NFTCancelled(uint256 indexed tokenId, address indexed seller);

        function ownerOf(uint256 tokenId) external view returns (address);
        function tokenURI(uint256 tokenId) external view returns (string);
        function getListing(uint256 tokenId) external view returns (address seller, uint256 price, bool isActive);
    }
}

pub mod ownable {
    alloy::sol! {
        event OwnershipTransferred(address indexed previousOwner, address indexed newOwner);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Compliance,
    Token,
    Oracle,
    Dex,
    Nft,
}

impl ContractKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractKind::Compliance => "compliance",
            ContractKind::Token => "token",
            ContractKind::Oracle => "oracle",
            ContractKind::Dex => "dex",
            ContractKind::Nft => "nft",
        }
    }
}

/// Addresses of the contracts the indexer follows.
///
/// Supplied once, either by the bootstrap call or by configuration, and
/// handed to the subscriber when it is constructed. It never changes for
/// the lifetime of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSet {
    pub compliance_address: Address,
    pub token_address: Address,
    pub oracle_address: Address,
    pub dex_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nft_address: Option<Address>,
}

impl ContractSet {
    /// Which monitored contract emitted a log from `address`, if any.
    pub fn kind_of(&self, address: Address) -> Option<ContractKind> {
        self.monitored()
            .into_iter()
            .find(|(_, monitored)| *monitored == address)
            .map(|(kind, _)| kind)
    }

    pub fn monitored(&self) -> Vec<(ContractKind, Address)> {
        let mut contracts = vec![
            (ContractKind::Compliance, self.compliance_address),
            (ContractKind::Token, self.token_address),
            (ContractKind::Oracle, self.oracle_address),
            (ContractKind::Dex, self.dex_address),
        ];
        if let Some(nft) = self.nft_address {
            contracts.push((ContractKind::Nft, nft));
        }
        contracts
    }
}

/// Current listing of an NFT as reported by the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listing {
    pub seller: Address,
    pub price: U256,
    pub active: bool,
}

async fn read<C, R>(chain: &dyn ChainClient, to: Address, call: C) -> Result<R, ChainError>
where
    C: SolCall,
    R: SolValue + From<<R::SolType as SolType>::RustType>,
{
    let output = chain.call(to, call.abi_encode().into()).await?;
    Ok(R::abi_decode(&output)?)
}

pub async fn balance_of(
    chain: &dyn ChainClient,
    token_address: Address,
    account: Address,
) -> Result<U256, ChainError> {
    read(chain, token_address, token::balanceOfCall { account }).await
}

pub async fn symbol(chain: &dyn ChainClient, token_address: Address) -> Result<String, ChainError> {
    read(chain, token_address, token::symbolCall {}).await
}

pub async fn get_price(
    chain: &dyn ChainClient,
    oracle_address: Address,
    symbol: &str,
) -> Result<U256, ChainError> {
    let call = oracle::getPriceCall {
        symbol: symbol.to_string(),
    };
    read(chain, oracle_address, call).await
}

pub async fn owner_of(
    chain: &dyn ChainClient,
    nft_address: Address,
    token_id: U256,
) -> Result<Address, ChainError> {
    read(chain, nft_address, nft::ownerOfCall { tokenId: token_id }).await
}

pub async fn token_uri(
    chain: &dyn ChainClient,
    nft_address: Address,
    token_id: U256,
) -> Result<String, ChainError> {
    read(chain, nft_address, nft::tokenURICall { tokenId: token_id }).await
}

pub async fn get_listing(
    chain: &dyn ChainClient,
    nft_address: Address,
    token_id: U256,
) -> Result<Listing, ChainError> {
    let (seller, price, active): (Address, U256, bool) =
        read(chain, nft_address, nft::getListingCall { tokenId: token_id }).await?;
    Ok(Listing {
        seller,
        price,
        active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;

    fn contracts() -> ContractSet {
        ContractSet {
            compliance_address: Address::repeat_byte(0x01),
            token_address: Address::repeat_byte(0x02),
            oracle_address: Address::repeat_byte(0x03),
            dex_address: Address::repeat_byte(0x04),
            nft_address: None,
        }
    }

    #[test]
    fn kind_of_ignores_unknown_addresses() {
        let set = contracts();
        assert_eq!(set.kind_of(Address::repeat_byte(0x04)), Some(ContractKind::Dex));
        assert_eq!(set.kind_of(Address::repeat_byte(0x05)), None);
        assert_eq!(set.monitored().len(), 4);
    }

    #[test]
    fn nft_address_is_optional_in_json() {
        let body = r#"{
            "complianceAddress": "0x0101010101010101010101010101010101010101",
            "tokenAddress": "0x0202020202020202020202020202020202020202",
            "oracleAddress": "0x0303030303030303030303030303030303030303",
            "dexAddress": "0x0404040404040404040404040404040404040404"
        }"#;
        let set: ContractSet = serde_json::from_str(body).unwrap();
        assert_eq!(set, contracts());

        let with_nft = ContractSet {
            nft_address: Some(Address::repeat_byte(0x05)),
            ..set
        };
        assert_eq!(with_nft.kind_of(Address::repeat_byte(0x05)), Some(ContractKind::Nft));
    }

    #[tokio::test]
    async fn read_calls_round_trip_through_the_node() {
        let chain = MockChain::new();
        let set = contracts();
        let holder = Address::repeat_byte(0xaa);
        chain.set_symbol(set.token_address, "GLD");
        chain.set_balance(set.token_address, holder, U256::from(60u64));
        chain.set_price("GLD", U256::from(10_000_000_000_000_000u64));

        assert_eq!(symbol(&chain, set.token_address).await.unwrap(), "GLD");
        assert_eq!(
            balance_of(&chain, set.token_address, holder).await.unwrap(),
            U256::from(60u64)
        );
        assert_eq!(
            get_price(&chain, set.oracle_address, "GLD").await.unwrap(),
            U256::from(10_000_000_000_000_000u64)
        );
    }

    #[tokio::test]
    async fn listing_is_decoded_from_tuple() {
        let chain = MockChain::new();
        let nft_address = Address::repeat_byte(0x05);
        let seller = Address::repeat_byte(0xbb);
        chain.set_listing(U256::from(7u64), seller, U256::from(5u64), true);

        let listing = get_listing(&chain, nft_address, U256::from(7u64)).await.unwrap();
        assert_eq!(
            listing,
            Listing {
                seller,
                price: U256::from(5u64),
                active: true
            }
        );
    }
}
