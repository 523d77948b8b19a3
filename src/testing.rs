//! In-memory contract and wallet used by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::types::{Address, TxHash, H256, U256};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};

use crate::contract::{ChainContract, ContractEvent, EventRecord, TxReceipt, WriteCall};
use crate::error::SyncError;
use crate::types::{unix_now, ChainBlock, PrxMetadata, Proposal};
use crate::wallet::{WalletEvent, WalletProvider};

/// Owner of every token created by `MockContract::seeded`
pub const SEED_OWNER: Address = Address::repeat_byte(0x5e);

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

#[derive(Debug, Clone)]
struct MockToken {
    owner: Address,
    metadata: String,
    prx: PrxMetadata,
}

#[derive(Debug, Default)]
struct MockChain {
    blocks: Vec<ChainBlock>,
    tokens: Vec<MockToken>,
    proposals: Vec<Proposal>,
    head: u64,
    logs: Vec<EventRecord>,
    pending: HashMap<TxHash, (Address, WriteCall)>,
}

/// How the next `send` should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    Rejected,
    Unreachable,
}

/// How receipts resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Success,
    Revert,
    Drop,
}

pub struct MockContract {
    chain: Mutex<MockChain>,
    failing_blocks: Mutex<HashSet<u64>>,
    failing_tokens: Mutex<HashSet<u64>>,
    failing_proposals: Mutex<HashSet<u64>>,
    fail_counts: AtomicBool,
    send_failure: Mutex<Option<SendFailure>>,
    receipt_outcome: Mutex<ReceiptOutcome>,
    receipts_open: watch::Sender<bool>,
    mint_price: U256,
    sends: AtomicUsize,
    reads: AtomicUsize,
    next_hash: AtomicU64,
}

impl MockContract {
    /// Genesis block only, no tokens or proposals.
    pub fn new() -> Self {
        let (receipts_open, _) = watch::channel(true);
        let genesis = ChainBlock {
            index: 0,
            timestamp: 1_700_000_000,
            minter: Address::zero(),
            previous_hash: H256::zero(),
            hash: H256::from_low_u64_be(1),
            metadata: "Genesis Block".to_string(),
        };
        Self {
            chain: Mutex::new(MockChain {
                blocks: vec![genesis],
                head: 100,
                ..Default::default()
            }),
            failing_blocks: Mutex::new(HashSet::new()),
            failing_tokens: Mutex::new(HashSet::new()),
            failing_proposals: Mutex::new(HashSet::new()),
            fail_counts: AtomicBool::new(false),
            send_failure: Mutex::new(None),
            receipt_outcome: Mutex::new(ReceiptOutcome::Success),
            receipts_open,
            mint_price: U256::exp10(16),
            sends: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            next_hash: AtomicU64::new(1),
        }
    }

    /// `tokens` tokens owned by `SEED_OWNER`, one block each after genesis.
    pub fn seeded(tokens: u64) -> Self {
        let mock = Self::new();
        {
            let mut chain = mock.chain.lock().unwrap();
            for i in 0..tokens {
                mint_into(&mut chain, SEED_OWNER, format!("Token {}", i), PrxMetadata::default());
            }
        }
        mock
    }

    pub fn add_proposal(&self, start_time: u64, end_time: u64) -> u64 {
        let mut chain = self.chain.lock().unwrap();
        let id = chain.proposals.len() as u64;
        chain.proposals.push(Proposal {
            id,
            description: format!("Proposal {}", id),
            proposer: SEED_OWNER,
            start_time,
            end_time,
            executed: false,
            passed: false,
            for_votes: U256::zero(),
            against_votes: U256::zero(),
        });
        id
    }

    pub fn fail_block(&self, index: u64) {
        self.failing_blocks.lock().unwrap().insert(index);
    }

    pub fn fail_token(&self, id: u64) {
        self.failing_tokens.lock().unwrap().insert(id);
    }

    pub fn fail_proposal(&self, id: u64) {
        self.failing_proposals.lock().unwrap().insert(id);
    }

    pub fn fail_counts(&self, fail: bool) {
        self.fail_counts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_send(&self, failure: SendFailure) {
        *self.send_failure.lock().unwrap() = Some(failure);
    }

    pub fn set_receipt_outcome(&self, outcome: ReceiptOutcome) {
        *self.receipt_outcome.lock().unwrap() = outcome;
    }

    /// While held, `wait_for_receipt` stays pending.
    pub fn hold_receipts(&self) {
        self.receipts_open.send_replace(false);
    }

    pub fn release_receipts(&self) {
        self.receipts_open.send_replace(true);
    }

    pub fn set_token_owner(&self, id: u64, owner: Address) {
        self.chain.lock().unwrap().tokens[id as usize].owner = owner;
    }

    pub fn set_private(&self, id: u64, private: bool) {
        self.chain.lock().unwrap().tokens[id as usize].prx.is_private = private;
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn token_count(&self) -> u64 {
        self.chain.lock().unwrap().tokens.len() as u64
    }

    /// Applies `call` as if another client had sent it, logging its events.
    pub fn external(&self, from: Address, call: WriteCall) -> Vec<ContractEvent> {
        let mut chain = self.chain.lock().unwrap();
        apply(&mut chain, from, &call)
    }

    /// Moves the head without any contract activity.
    pub fn advance_head(&self, blocks: u64) {
        self.chain.lock().unwrap().head += blocks;
    }

    fn read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn check_counts(&self) -> Result<(), SyncError> {
        self.read();
        if self.fail_counts.load(Ordering::SeqCst) {
            return Err(SyncError::ContractUnreachable("count read failed".into()));
        }
        Ok(())
    }

    fn check(set: &Mutex<HashSet<u64>>, index: u64) -> Result<(), SyncError> {
        if set.lock().unwrap().contains(&index) {
            return Err(SyncError::DecodeError(format!("bad entity {}", index)));
        }
        Ok(())
    }

    fn token(&self, id: u64) -> Result<MockToken, SyncError> {
        self.read();
        Self::check(&self.failing_tokens, id)?;
        self.chain
            .lock()
            .unwrap()
            .tokens
            .get(id as usize)
            .cloned()
            .ok_or_else(|| SyncError::TransactionReverted {
                tx_hash: None,
                message: "Token does not exist".into(),
            })
    }
}

fn mint_into(chain: &mut MockChain, owner: Address, metadata: String, prx: PrxMetadata) -> (u64, u64) {
    let index = chain.blocks.len() as u64;
    let previous_hash = chain.blocks.last().map(|b| b.hash).unwrap_or_default();
    chain.blocks.push(ChainBlock {
        index,
        timestamp: 1_700_000_000 + index,
        minter: owner,
        previous_hash,
        hash: H256::from_low_u64_be(index + 1),
        metadata: metadata.clone(),
    });
    let token_id = chain.tokens.len() as u64;
    chain.tokens.push(MockToken {
        owner,
        metadata,
        prx: PrxMetadata {
            creator: owner,
            creation_block: index,
            ..prx
        },
    });
    (index, token_id)
}

fn apply(chain: &mut MockChain, from: Address, call: &WriteCall) -> Vec<ContractEvent> {
    let events = match call {
        WriteCall::Mint { metadata, .. } => {
            let (index, token_id) = mint_into(chain, from, metadata.clone(), PrxMetadata::default());
            vec![
                ContractEvent::BlockMined {
                    block_number: index,
                    block_hash: H256::from_low_u64_be(index + 1),
                },
                ContractEvent::TokenMinted {
                    token_id,
                    owner: from,
                    block_number: index,
                },
            ]
        }
        WriteCall::MintWithContent {
            metadata,
            content_uri,
            content_type,
            is_private,
            ..
        } => {
            let prx = PrxMetadata {
                content_uri: content_uri.clone(),
                content_type: content_type.clone(),
                is_private: *is_private,
                ..Default::default()
            };
            let (index, token_id) = mint_into(chain, from, metadata.clone(), prx);
            vec![
                ContractEvent::TokenMinted {
                    token_id,
                    owner: from,
                    block_number: index,
                },
                ContractEvent::ContentLinked {
                    token_id,
                    content_uri: content_uri.clone(),
                    content_type: content_type.clone(),
                },
            ]
        }
        WriteCall::Transfer { to, token_id } => {
            chain.tokens[*token_id as usize].owner = *to;
            vec![ContractEvent::TokenTransferred {
                from,
                to: *to,
                token_id: *token_id,
            }]
        }
        WriteCall::LinkContent {
            token_id,
            linked_token_id,
        } => {
            let token = &mut chain.tokens[*token_id as usize];
            token.prx.linked_tokens.push(*linked_token_id);
            vec![ContractEvent::ContentLinked {
                token_id: *token_id,
                content_uri: token.prx.content_uri.clone(),
                content_type: token.prx.content_type.clone(),
            }]
        }
        WriteCall::CreateProposal {
            description,
            voting_period,
            ..
        } => {
            let id = chain.proposals.len() as u64;
            let start_time = unix_now();
            chain.proposals.push(Proposal {
                id,
                description: description.clone(),
                proposer: from,
                start_time,
                end_time: start_time + voting_period,
                executed: false,
                passed: false,
                for_votes: U256::zero(),
                against_votes: U256::zero(),
            });
            vec![ContractEvent::ProposalCreated {
                proposal_id: id,
                proposer: from,
                description: description.clone(),
                start_time,
                end_time: start_time + voting_period,
            }]
        }
        WriteCall::Vote {
            proposal_id,
            support,
        } => {
            let proposal = &mut chain.proposals[*proposal_id as usize];
            if *support {
                proposal.for_votes += U256::one();
            } else {
                proposal.against_votes += U256::one();
            }
            vec![ContractEvent::Voted {
                proposal_id: *proposal_id,
                voter: from,
                support: *support,
                weight: U256::one(),
            }]
        }
        WriteCall::ExecuteProposal { proposal_id } => {
            let proposal = &mut chain.proposals[*proposal_id as usize];
            proposal.executed = true;
            proposal.passed = proposal.for_votes > proposal.against_votes;
            vec![ContractEvent::ProposalExecuted {
                proposal_id: *proposal_id,
                passed: proposal.passed,
            }]
        }
    };

    chain.head += 1;
    let block_number = chain.head;
    for event in &events {
        chain.logs.push(EventRecord {
            event: event.clone(),
            block_number: Some(block_number),
            tx_hash: None,
            log_index: None,
        });
    }
    events
}

#[async_trait]
impl ChainContract for MockContract {
    fn address(&self) -> Address {
        Address::repeat_byte(0xc0)
    }

    async fn name(&self) -> Result<String, SyncError> {
        self.read();
        Ok("PRX Token Chain".into())
    }

    async fn symbol(&self) -> Result<String, SyncError> {
        self.read();
        Ok("PRX".into())
    }

    async fn total_supply(&self) -> Result<u64, SyncError> {
        self.check_counts()?;
        Ok(self.chain.lock().unwrap().tokens.len() as u64)
    }

    async fn block_count(&self) -> Result<u64, SyncError> {
        self.check_counts()?;
        Ok(self.chain.lock().unwrap().blocks.len() as u64)
    }

    async fn mint_price(&self) -> Result<U256, SyncError> {
        self.read();
        Ok(self.mint_price)
    }

    async fn balance_of(&self, owner: Address) -> Result<u64, SyncError> {
        self.read();
        let chain = self.chain.lock().unwrap();
        Ok(chain.tokens.iter().filter(|t| t.owner == owner).count() as u64)
    }

    async fn verify_chain(&self) -> Result<bool, SyncError> {
        self.read();
        let chain = self.chain.lock().unwrap();
        Ok(chain
            .blocks
            .windows(2)
            .all(|pair| pair[1].previous_hash == pair[0].hash))
    }

    async fn get_block(&self, index: u64) -> Result<ChainBlock, SyncError> {
        self.read();
        Self::check(&self.failing_blocks, index)?;
        self.chain
            .lock()
            .unwrap()
            .blocks
            .get(index as usize)
            .cloned()
            .ok_or_else(|| SyncError::DecodeError("no such block".into()))
    }

    async fn get_token(&self, token_id: u64) -> Result<(Address, String), SyncError> {
        let token = self.token(token_id)?;
        Ok((token.owner, token.metadata))
    }

    async fn token_owner(&self, token_id: u64) -> Result<Address, SyncError> {
        Ok(self.token(token_id)?.owner)
    }

    async fn prx_metadata(&self, token_id: u64) -> Result<PrxMetadata, SyncError> {
        Ok(self.token(token_id)?.prx)
    }

    async fn linked_content(&self, token_id: u64) -> Result<Vec<u64>, SyncError> {
        Ok(self.token(token_id)?.prx.linked_tokens)
    }

    async fn can_access_content(&self, user: Address, token_id: u64) -> Result<bool, SyncError> {
        let token = self.token(token_id)?;
        Ok(!token.prx.is_private || token.owner == user || token.prx.creator == user)
    }

    async fn proposal_count(&self) -> Result<u64, SyncError> {
        self.check_counts()?;
        Ok(self.chain.lock().unwrap().proposals.len() as u64)
    }

    async fn minimum_voting_period(&self) -> Result<u64, SyncError> {
        self.read();
        Ok(86_400)
    }

    async fn minimum_votes_required(&self) -> Result<u64, SyncError> {
        self.read();
        Ok(3)
    }

    async fn governance_threshold(&self) -> Result<u64, SyncError> {
        self.read();
        Ok(51)
    }

    async fn proposal(&self, proposal_id: u64) -> Result<Proposal, SyncError> {
        self.read();
        Self::check(&self.failing_proposals, proposal_id)?;
        self.chain
            .lock()
            .unwrap()
            .proposals
            .get(proposal_id as usize)
            .cloned()
            .ok_or_else(|| SyncError::DecodeError("no such proposal".into()))
    }

    async fn send(&self, from: Address, call: &WriteCall) -> Result<TxHash, SyncError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        match self.send_failure.lock().unwrap().take() {
            Some(SendFailure::Rejected) => return Err(SyncError::UserRejected),
            Some(SendFailure::Unreachable) => {
                return Err(SyncError::ContractUnreachable("node down".into()))
            }
            None => {}
        }
        let tx_hash = H256::from_low_u64_be(self.next_hash.fetch_add(1, Ordering::SeqCst));
        self.chain
            .lock()
            .unwrap()
            .pending
            .insert(tx_hash, (from, call.clone()));
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt, SyncError> {
        let mut open = self.receipts_open.subscribe();
        let _ = open.wait_for(|open| *open).await;

        let outcome = *self.receipt_outcome.lock().unwrap();
        let mut chain = self.chain.lock().unwrap();
        let (from, call) = chain
            .pending
            .remove(&tx_hash)
            .ok_or(SyncError::TransactionDropped(tx_hash))?;
        match outcome {
            ReceiptOutcome::Drop => Err(SyncError::TransactionDropped(tx_hash)),
            ReceiptOutcome::Revert => Err(SyncError::TransactionReverted {
                tx_hash: Some(tx_hash),
                message: "transaction reverted on-chain".into(),
            }),
            ReceiptOutcome::Success => {
                let events = apply(&mut chain, from, &call);
                Ok(TxReceipt {
                    tx_hash,
                    block_number: Some(chain.head),
                    events,
                })
            }
        }
    }

    async fn latest_block_number(&self) -> Result<u64, SyncError> {
        Ok(self.chain.lock().unwrap().head)
    }

    async fn events_between(&self, from: u64, to: u64) -> Result<Vec<EventRecord>, SyncError> {
        let chain = self.chain.lock().unwrap();
        Ok(chain
            .logs
            .iter()
            .filter(|r| r.block_number.is_some_and(|n| n >= from && n <= to))
            .cloned()
            .collect())
    }
}

/// Wallet with a fixed account list, answering the handful of methods the adapter uses.
pub struct MockWalletProvider {
    accounts: Mutex<Vec<Address>>,
    chain_id: AtomicU64,
    balances: Mutex<HashMap<Address, U256>>,
    reject_next: AtomicBool,
    events: broadcast::Sender<WalletEvent>,
}

impl MockWalletProvider {
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            accounts: Mutex::new(accounts),
            chain_id: AtomicU64::new(chain_id),
            balances: Mutex::new(HashMap::new()),
            reject_next: AtomicBool::new(false),
            events,
        }
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.balances.lock().unwrap().insert(address, balance);
    }

    pub fn reject_next_request(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    /// Changes the wallet state and pushes the matching notification.
    pub fn emit(&self, event: WalletEvent) {
        match &event {
            WalletEvent::AccountsChanged(accounts) => *self.accounts.lock().unwrap() = accounts.clone(),
            WalletEvent::ChainChanged(id) => self.chain_id.store(*id, Ordering::SeqCst),
        }
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl WalletProvider for MockWalletProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, SyncError> {
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(SyncError::from_rpc_response(4001, "User rejected the request."));
        }
        match method {
            "eth_requestAccounts" | "eth_accounts" => Ok(json!(*self.accounts.lock().unwrap())),
            "eth_chainId" => Ok(json!(format!("{:#x}", self.chain_id.load(Ordering::SeqCst)))),
            "eth_getBalance" => {
                let address: Address = serde_json::from_value(params[0].clone())
                    .map_err(|e| SyncError::InvalidInput(e.to_string()))?;
                let balance = self
                    .balances
                    .lock()
                    .unwrap()
                    .get(&address)
                    .copied()
                    .unwrap_or_default();
                Ok(json!(balance))
            }
            other => Err(SyncError::WalletUnavailable(format!("unsupported method {}", other))),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
