use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ethers::types::{Address, H256, U256};
use ethers::utils::{format_ether, to_checksum};
use serde::{Deserialize, Serialize};

use crate::utils::format_address;

/// Current wall-clock time as Unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// The locally connected wallet identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    /// Native balance rendered in ether, e.g. `"1.500000000000000000"`
    pub balance: String,
    pub chain_id: u64,
}

impl Account {
    pub fn new(address: Address, balance_wei: U256, chain_id: u64) -> Self {
        Self {
            address,
            balance: format_ether(balance_wei),
            chain_id,
        }
    }

    /// EIP-55 checksummed address.
    pub fn checksummed(&self) -> String {
        to_checksum(&self.address, None)
    }
}

/// One entry of the contract's internal block chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    pub index: u64,
    /// Unix seconds
    pub timestamp: u64,
    pub minter: Address,
    pub previous_hash: H256,
    pub hash: H256,
    pub metadata: String,
}

impl ChainBlock {
    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

/// Coarse classification of a token's MIME content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Image,
    Video,
    Audio,
    Text,
    Json,
    Other,
}

impl ContentKind {
    /// Classifies `image/png`, `video`, `application/json` and friends.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        let top = mime.split('/').next().unwrap_or_default();
        match top {
            "image" => ContentKind::Image,
            "video" => ContentKind::Video,
            "audio" => ContentKind::Audio,
            "text" => ContentKind::Text,
            _ if mime.ends_with("json") => ContentKind::Json,
            _ => ContentKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDescriptor {
    pub uri: String,
    pub content_type: String,
    pub is_private: bool,
}

impl ContentDescriptor {
    pub fn kind(&self) -> ContentKind {
        ContentKind::from_mime(&self.content_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: u64,
    pub owner: Address,
    pub metadata: String,
    pub content: ContentDescriptor,
    pub creator: Address,
    pub creation_block: u64,
    /// Tokens this one links to. Direction only, the reverse edge is not implied.
    pub linked: BTreeSet<u64>,
}

/// Raw `prxMetadata(tokenId)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrxMetadata {
    pub content_uri: String,
    pub content_type: String,
    pub creator: Address,
    pub creation_block: u64,
    pub is_private: bool,
    pub linked_tokens: Vec<u64>,
}

/// Computed lifecycle stage of a governance proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    Pending,
    VotingActive,
    VotingEnded,
    Passed,
    Rejected,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalStatus::Pending => write!(f, "Pending"),
            ProposalStatus::VotingActive => write!(f, "Voting Active"),
            ProposalStatus::VotingEnded => write!(f, "Voting Ended (Not Executed)"),
            ProposalStatus::Passed => write!(f, "Passed"),
            ProposalStatus::Rejected => write!(f, "Rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub description: String,
    pub proposer: Address,
    pub start_time: u64,
    pub end_time: u64,
    pub executed: bool,
    pub passed: bool,
    pub for_votes: U256,
    pub against_votes: U256,
}

impl Proposal {
    /// Status as of `now` (Unix seconds). Executed/passed are final once set.
    pub fn status(&self, now: u64) -> ProposalStatus {
        if self.executed {
            if self.passed {
                ProposalStatus::Passed
            } else {
                ProposalStatus::Rejected
            }
        } else if now < self.start_time {
            ProposalStatus::Pending
        } else if now > self.end_time {
            ProposalStatus::VotingEnded
        } else {
            ProposalStatus::VotingActive
        }
    }

    /// Vote controls are shown only while voting is open.
    pub fn can_vote(&self, now: u64) -> bool {
        self.status(now) == ProposalStatus::VotingActive
    }

    /// The execute control is shown once voting ended without execution.
    pub fn can_execute(&self, now: u64) -> bool {
        self.status(now) == ProposalStatus::VotingEnded
    }

    pub fn total_votes(&self) -> U256 {
        self.for_votes.saturating_add(self.against_votes)
    }

    /// Integer percentages `(for, against)`; `(0, 0)` when nobody voted.
    pub fn vote_percentages(&self) -> (u64, u64) {
        let total = self.total_votes();
        if total.is_zero() {
            return (0, 0);
        }
        let hundred = U256::from(100u8);
        let pct = |votes: U256| (votes.saturating_mul(hundred) / total).low_u64();
        (pct(self.for_votes), pct(self.against_votes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub name: String,
    pub symbol: String,
    pub total_supply: u64,
    pub block_count: u64,
    pub mint_price: U256,
    /// Result of `verifyChain()`, `None` when the call failed
    pub chain_valid: Option<bool>,
}

impl ContractInfo {
    pub fn mint_price_ether(&self) -> String {
        format_ether(self.mint_price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceParams {
    pub proposal_count: u64,
    /// Seconds
    pub minimum_voting_period: u64,
    pub minimum_votes_required: u64,
    /// Percent
    pub governance_threshold: u64,
}

impl GovernanceParams {
    pub fn minimum_voting_period_days(&self) -> f64 {
        self.minimum_voting_period as f64 / (24.0 * 60.0 * 60.0)
    }
}

/// Tokens needed to open a proposal: 1% of total supply.
pub fn required_proposal_stake(total_supply: u64) -> u64 {
    total_supply / 100
}

/// A line of the "recent activity" feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activity {
    Genesis { timestamp: u64 },
    BlockMinted { index: u64, timestamp: u64, minter: Address },
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Genesis { .. } => write!(f, "Genesis block created"),
            Activity::BlockMinted { index, minter, .. } => {
                write!(f, "Block #{} minted by {}", index, format_address(minter))
            }
        }
    }
}

/// Everything a UI needs, assembled in one pass and swapped atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSnapshot {
    /// Bumped on every publish
    pub version: u64,
    /// Unix seconds of the most recent read that went into this snapshot
    pub fetched_at: u64,
    pub contract: Option<ContractInfo>,
    pub governance: Option<GovernanceParams>,
    pub block_count: u64,
    pub total_supply: u64,
    pub proposal_count: u64,
    /// Newest first
    pub blocks: Vec<ChainBlock>,
    /// Newest first
    pub tokens: Vec<Token>,
    /// Newest first
    pub proposals: Vec<Proposal>,
    pub account: Option<Account>,
    /// Tokens held by `account`, ascending id
    pub owned_tokens: Vec<Token>,
}

impl ViewSnapshot {
    pub fn is_empty(&self) -> bool {
        self.contract.is_none() && self.blocks.is_empty() && self.tokens.is_empty()
    }

    pub fn recent_activity(&self) -> Vec<Activity> {
        self.blocks
            .iter()
            .map(|b| {
                if b.is_genesis() {
                    Activity::Genesis { timestamp: b.timestamp }
                } else {
                    Activity::BlockMinted {
                        index: b.index,
                        timestamp: b.timestamp,
                        minter: b.minter,
                    }
                }
            })
            .collect()
    }

    pub fn proposal(&self, id: u64) -> Option<&Proposal> {
        self.proposals.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSummary {
    pub address: Address,
    /// Token count from `balanceOf`
    pub token_balance: u64,
    pub tokens: Vec<Token>,
}

/// Outcome of an explorer search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchResult {
    /// A numeric query can hit a block, a token, or both
    Index {
        block: Option<ChainBlock>,
        token: Option<Token>,
    },
    Address(AddressSummary),
    NotFound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

/// Rolling statistics about the RPC connection behind a binding.
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    pub last_successful_call: Option<Instant>,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub failed_calls: u64,
    pub avg_response_time: Duration,
    pub connection_status: ConnectionStatus,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            last_successful_call: None,
            consecutive_failures: 0,
            total_calls: 0,
            failed_calls: 0,
            avg_response_time: Duration::ZERO,
            connection_status: ConnectionStatus::Unknown,
        }
    }
}

impl HealthMetrics {
    pub fn record_success(&mut self, response_time: Duration) {
        self.last_successful_call = Some(Instant::now());
        self.consecutive_failures = 0;
        self.total_calls += 1;
        self.connection_status = ConnectionStatus::Healthy;

        let total_successful = self.total_calls - self.failed_calls;
        if total_successful == 1 {
            self.avg_response_time = response_time;
        } else {
            let current = self.avg_response_time.as_nanos() as f64;
            let n = total_successful as f64;
            let avg = (current * (n - 1.0) + response_time.as_nanos() as f64) / n;
            self.avg_response_time = Duration::from_nanos(avg as u64);
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.total_calls += 1;
        self.failed_calls += 1;
        self.connection_status = if self.consecutive_failures > 5 {
            ConnectionStatus::Unhealthy
        } else {
            ConnectionStatus::Degraded
        };
    }
}
