use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ethers::types::{Address, TxHash};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::contract::{ActionKey, ChainContract, ContractEvent, TxReceipt, WriteCall};
use crate::error::SyncError;
use crate::sync::{RefreshPlan, SnapshotRefresher};

/// Lifecycle of one logical action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TxPhase {
    Idle,
    Submitting,
    Pending,
    Confirmed,
    Reverted,
    Dropped,
}

/// Broadcast on every phase change.
#[derive(Debug, Clone, Serialize)]
pub struct TxUpdate {
    pub id: Uuid,
    pub action: ActionKey,
    pub phase: TxPhase,
    pub tx_hash: Option<TxHash>,
    pub message: Option<String>,
}

/// Decoded result of a confirmed write. `None` ids mean the event was missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Minted { token_id: Option<u64> },
    Transferred { token_id: u64, to: Address },
    Linked { token_id: u64, linked_token_id: u64 },
    ProposalCreated { proposal_id: Option<u64> },
    Voted { proposal_id: u64, support: bool },
    Executed { proposal_id: u64, passed: Option<bool> },
}

impl TxOutcome {
    fn from_receipt(call: &WriteCall, from: Address, receipt: &TxReceipt) -> Self {
        match call {
            WriteCall::Mint { .. } | WriteCall::MintWithContent { .. } => TxOutcome::Minted {
                token_id: receipt.events.iter().find_map(|e| match e {
                    ContractEvent::TokenMinted { token_id, owner, .. } if *owner == from => {
                        Some(*token_id)
                    }
                    _ => None,
                }),
            },
            WriteCall::Transfer { to, token_id } => TxOutcome::Transferred {
                token_id: *token_id,
                to: *to,
            },
            WriteCall::LinkContent {
                token_id,
                linked_token_id,
            } => TxOutcome::Linked {
                token_id: *token_id,
                linked_token_id: *linked_token_id,
            },
            WriteCall::CreateProposal { .. } => TxOutcome::ProposalCreated {
                proposal_id: receipt.events.iter().find_map(|e| match e {
                    ContractEvent::ProposalCreated { proposal_id, .. } => Some(*proposal_id),
                    _ => None,
                }),
            },
            WriteCall::Vote {
                proposal_id,
                support,
            } => TxOutcome::Voted {
                proposal_id: *proposal_id,
                support: *support,
            },
            WriteCall::ExecuteProposal { proposal_id } => TxOutcome::Executed {
                proposal_id: *proposal_id,
                passed: receipt.events.iter().find_map(|e| match e {
                    ContractEvent::ProposalExecuted { passed, .. } => Some(*passed),
                    _ => None,
                }),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub id: Uuid,
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub outcome: TxOutcome,
}

type InFlight = Arc<Mutex<HashMap<ActionKey, TxPhase>>>;

/// Holds an action key while its transaction is outstanding.
struct InFlightSlot {
    key: ActionKey,
    table: InFlight,
}

impl InFlightSlot {
    fn claim(table: &InFlight, key: ActionKey) -> Result<Self, SyncError> {
        let mut entries = table.lock().unwrap_or_else(|p| p.into_inner());
        if entries.contains_key(&key) {
            return Err(SyncError::AlreadyInProgress(key.to_string()));
        }
        entries.insert(key, TxPhase::Submitting);
        Ok(Self {
            key,
            table: Arc::clone(table),
        })
    }

    fn set(&self, phase: TxPhase) {
        let mut entries = self.table.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(self.key, phase);
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        let mut entries = self.table.lock().unwrap_or_else(|p| p.into_inner());
        entries.remove(&self.key);
    }
}

/// Drives writes through `Submitting -> Pending -> Confirmed | Reverted | Dropped`.
pub struct TransactionSubmitter {
    contract: Arc<dyn ChainContract>,
    refresher: Arc<dyn SnapshotRefresher>,
    in_flight: InFlight,
    updates: broadcast::Sender<TxUpdate>,
}

impl TransactionSubmitter {
    pub fn new(contract: Arc<dyn ChainContract>, refresher: Arc<dyn SnapshotRefresher>) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            contract,
            refresher,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TxUpdate> {
        self.updates.subscribe()
    }

    pub fn phase(&self, key: &ActionKey) -> TxPhase {
        let entries = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(key).copied().unwrap_or(TxPhase::Idle)
    }

    /// Sends `call` from `from` and waits for the outcome.
    ///
    /// A second submission of the same action while one is outstanding fails
    /// with `AlreadyInProgress` without touching the network. Cancelling
    /// `cancel` stops the wait only: the action goes back to `Idle` at once
    /// and the refresh still happens when the transaction confirms.
    #[instrument(skip(self, call, cancel), fields(action = %call.action_key(from)))]
    pub async fn submit(
        &self,
        from: Address,
        call: WriteCall,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, SyncError> {
        let key = call.action_key(from);
        let slot = InFlightSlot::claim(&self.in_flight, key)?;
        let id = Uuid::new_v4();
        emit(&self.updates, id, key, TxPhase::Submitting, None, None);

        let tx_hash = match self.contract.send(from, &call).await {
            Ok(hash) => hash,
            Err(e) => {
                if e.is_user_rejection() {
                    debug!("User rejected the transaction");
                } else {
                    warn!(error = %e, "Submission failed");
                }
                emit(&self.updates, id, key, TxPhase::Idle, None, Some(e.to_string()));
                return Err(e);
            }
        };

        slot.set(TxPhase::Pending);
        emit(&self.updates, id, key, TxPhase::Pending, Some(tx_hash), None);

        // the wait lives in its own task so it can outlive a cancelled caller
        let contract = Arc::clone(&self.contract);
        let refresher = Arc::clone(&self.refresher);
        let updates = self.updates.clone();
        let plan = RefreshPlan::for_action(key.kind);
        let mut waiter = tokio::spawn(async move {
            let result = contract.wait_for_receipt(tx_hash).await;
            match &result {
                Ok(receipt) => {
                    info!(tx = ?tx_hash, block = ?receipt.block_number, "Transaction confirmed");
                    emit(&updates, id, key, TxPhase::Confirmed, Some(tx_hash), None);
                    if let Err(e) = refresher.refresh(plan).await {
                        warn!(error = %e, "Refresh after confirmation failed");
                    }
                }
                Err(e) => {
                    let phase = match e {
                        SyncError::TransactionDropped(_) => TxPhase::Dropped,
                        _ => TxPhase::Reverted,
                    };
                    warn!(tx = ?tx_hash, error = %e, "Transaction failed");
                    emit(&updates, id, key, phase, Some(tx_hash), Some(e.to_string()));
                }
            }
            result
        });

        let result = tokio::select! {
            joined = &mut waiter => joined
                .map_err(|e| SyncError::Other(anyhow::anyhow!("receipt task failed: {}", e)))?,
            _ = cancel.cancelled() => {
                info!(tx = ?tx_hash, "Stopped waiting for transaction");
                drop(slot);
                emit(&self.updates, id, key, TxPhase::Idle, Some(tx_hash), Some("stopped waiting".into()));
                return Err(SyncError::WaitCancelled(tx_hash));
            }
        };

        let receipt = result?;
        Ok(Confirmation {
            id,
            tx_hash,
            block_number: receipt.block_number,
            outcome: TxOutcome::from_receipt(&call, from, &receipt),
        })
    }
}

fn emit(
    updates: &broadcast::Sender<TxUpdate>,
    id: Uuid,
    action: ActionKey,
    phase: TxPhase,
    tx_hash: Option<TxHash>,
    message: Option<String>,
) {
    // no subscribers is fine
    let _ = updates.send(TxUpdate {
        id,
        action,
        phase,
        tx_hash,
        message,
    });
}
