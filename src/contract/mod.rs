//! Typed surface of the `PRXTokenChain` contract.

pub mod clients;
pub mod ethers_binding;
pub mod events;

use std::fmt;

use async_trait::async_trait;
use ethers::abi::Abi;
use ethers::types::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::{ChainBlock, PrxMetadata, Proposal};

pub use clients::RpcClient;
pub use ethers_binding::EthersContract;
pub use events::{ContractEvent, EventRecord};

/// JSON ABI of the deployed contract
pub const PRX_TOKEN_CHAIN_ABI: &str = include_str!("abi/PRXTokenChain.json");

pub fn prx_abi() -> Result<Abi, SyncError> {
    serde_json::from_str(PRX_TOKEN_CHAIN_ABI)
        .map_err(|e| SyncError::Configuration(format!("Bundled ABI is invalid: {}", e)))
}

/// A state-changing contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteCall {
    Mint {
        metadata: String,
        /// Attached payment, normally the current `mintPrice`
        value: U256,
    },
    MintWithContent {
        metadata: String,
        content_uri: String,
        content_type: String,
        is_private: bool,
        value: U256,
    },
    Transfer {
        to: Address,
        token_id: u64,
    },
    LinkContent {
        token_id: u64,
        linked_token_id: u64,
    },
    CreateProposal {
        description: String,
        /// Seconds
        voting_period: u64,
        execution_data: Bytes,
    },
    Vote {
        proposal_id: u64,
        support: bool,
    },
    ExecuteProposal {
        proposal_id: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Mint,
    Transfer,
    Link,
    CreateProposal,
    Vote,
    Execute,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Mint => "mint",
            ActionKind::Transfer => "transfer",
            ActionKind::Link => "link",
            ActionKind::CreateProposal => "create-proposal",
            ActionKind::Vote => "vote",
            ActionKind::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// Identity of a logical user action; at most one transaction per key is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionKey {
    pub account: Address,
    pub kind: ActionKind,
    pub subject: Option<u64>,
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subject {
            Some(subject) => write!(f, "{} #{} by {:#x}", self.kind, subject, self.account),
            None => write!(f, "{} by {:#x}", self.kind, self.account),
        }
    }
}

impl WriteCall {
    pub fn method_name(&self) -> &'static str {
        match self {
            WriteCall::Mint { .. } => "mint",
            WriteCall::MintWithContent { .. } => "mintWithContent",
            WriteCall::Transfer { .. } => "transfer",
            WriteCall::LinkContent { .. } => "linkContent",
            WriteCall::CreateProposal { .. } => "createProposal",
            WriteCall::Vote { .. } => "vote",
            WriteCall::ExecuteProposal { .. } => "executeProposal",
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            WriteCall::Mint { .. } | WriteCall::MintWithContent { .. } => ActionKind::Mint,
            WriteCall::Transfer { .. } => ActionKind::Transfer,
            WriteCall::LinkContent { .. } => ActionKind::Link,
            WriteCall::CreateProposal { .. } => ActionKind::CreateProposal,
            WriteCall::Vote { .. } => ActionKind::Vote,
            WriteCall::ExecuteProposal { .. } => ActionKind::Execute,
        }
    }

    /// Proposal id for governance calls, source token id for transfer/link.
    pub fn subject(&self) -> Option<u64> {
        match self {
            WriteCall::Transfer { token_id, .. } | WriteCall::LinkContent { token_id, .. } => {
                Some(*token_id)
            }
            WriteCall::Vote { proposal_id, .. } | WriteCall::ExecuteProposal { proposal_id } => {
                Some(*proposal_id)
            }
            _ => None,
        }
    }

    pub fn action_key(&self, account: Address) -> ActionKey {
        ActionKey {
            account,
            kind: self.kind(),
            subject: self.subject(),
        }
    }

    pub fn value(&self) -> U256 {
        match self {
            WriteCall::Mint { value, .. } | WriteCall::MintWithContent { value, .. } => *value,
            _ => U256::zero(),
        }
    }
}

/// A mined, successful transaction and the contract events it emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub events: Vec<ContractEvent>,
}

/// Read and write access to one deployed contract.
///
/// Reads may be retried by implementations. `send` is never retried and
/// returns as soon as the wallet hands back a transaction hash.
#[async_trait]
pub trait ChainContract: Send + Sync {
    fn address(&self) -> Address;

    async fn name(&self) -> Result<String, SyncError>;
    async fn symbol(&self) -> Result<String, SyncError>;
    async fn total_supply(&self) -> Result<u64, SyncError>;
    async fn block_count(&self) -> Result<u64, SyncError>;
    async fn mint_price(&self) -> Result<U256, SyncError>;
    /// Number of tokens held by `owner`
    async fn balance_of(&self, owner: Address) -> Result<u64, SyncError>;
    async fn verify_chain(&self) -> Result<bool, SyncError>;

    async fn get_block(&self, index: u64) -> Result<ChainBlock, SyncError>;
    /// `(owner, metadata)`
    async fn get_token(&self, token_id: u64) -> Result<(Address, String), SyncError>;
    async fn token_owner(&self, token_id: u64) -> Result<Address, SyncError>;
    async fn prx_metadata(&self, token_id: u64) -> Result<PrxMetadata, SyncError>;
    async fn linked_content(&self, token_id: u64) -> Result<Vec<u64>, SyncError>;
    async fn can_access_content(&self, user: Address, token_id: u64) -> Result<bool, SyncError>;

    async fn proposal_count(&self) -> Result<u64, SyncError>;
    async fn minimum_voting_period(&self) -> Result<u64, SyncError>;
    async fn minimum_votes_required(&self) -> Result<u64, SyncError>;
    async fn governance_threshold(&self) -> Result<u64, SyncError>;
    async fn proposal(&self, proposal_id: u64) -> Result<Proposal, SyncError>;

    /// Hands the call to the wallet for signing and broadcast.
    async fn send(&self, from: Address, call: &WriteCall) -> Result<TxHash, SyncError>;

    /// Resolves once the transaction is confirmed, reverted or dropped.
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt, SyncError>;

    async fn latest_block_number(&self) -> Result<u64, SyncError>;

    /// Contract events in the inclusive block range `[from, to]`.
    async fn events_between(&self, from: u64, to: u64) -> Result<Vec<EventRecord>, SyncError>;
}
