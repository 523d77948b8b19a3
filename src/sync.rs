use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::SyncConfig;
use crate::contract::{ActionKind, ContractEvent};
use crate::error::SyncError;
use crate::reader::ChainReader;
use crate::store::ViewStore;
use crate::types::{unix_now, ViewSnapshot};
use crate::wallet::WalletAdapter;

/// Which parts of the snapshot a refresh re-reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshPlan {
    /// Name, symbol, counts, mint price and chain validity
    pub contract: bool,
    pub governance: bool,
    pub blocks: bool,
    pub tokens: bool,
    pub proposals: bool,
    /// Tokens held by the connected account
    pub owned: bool,
    /// Native balance of the connected account
    pub balance: bool,
}

impl RefreshPlan {
    pub fn all() -> Self {
        Self {
            contract: true,
            governance: true,
            blocks: true,
            tokens: true,
            proposals: true,
            owned: true,
            balance: true,
        }
    }

    /// Identity-dependent parts only.
    pub fn account() -> Self {
        Self {
            owned: true,
            balance: true,
            ..Self::default()
        }
    }

    /// What a confirmed transaction of `kind` by the local account can change.
    pub fn for_action(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Mint => Self {
                contract: true,
                blocks: true,
                tokens: true,
                owned: true,
                balance: true,
                ..Self::default()
            },
            ActionKind::Transfer | ActionKind::Link => Self {
                tokens: true,
                owned: true,
                balance: true,
                ..Self::default()
            },
            ActionKind::CreateProposal | ActionKind::Execute => Self {
                governance: true,
                proposals: true,
                balance: true,
                ..Self::default()
            },
            ActionKind::Vote => Self {
                proposals: true,
                balance: true,
                ..Self::default()
            },
        }
    }

    /// What another client's event can change in the local view.
    pub fn for_event(event: &ContractEvent) -> Self {
        match event {
            ContractEvent::TokenMinted { .. } => Self {
                contract: true,
                blocks: true,
                tokens: true,
                ..Self::default()
            },
            ContractEvent::ProposalCreated { .. } => Self {
                governance: true,
                proposals: true,
                ..Self::default()
            },
            ContractEvent::Voted { .. } => Self {
                proposals: true,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            contract: self.contract || other.contract,
            governance: self.governance || other.governance,
            blocks: self.blocks || other.blocks,
            tokens: self.tokens || other.tokens,
            proposals: self.proposals || other.proposals,
            owned: self.owned || other.owned,
            balance: self.balance || other.balance,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The one path that rebuilds and publishes the view.
#[async_trait]
pub trait SnapshotRefresher: Send + Sync {
    async fn refresh(&self, plan: RefreshPlan) -> Result<Arc<ViewSnapshot>, SyncError>;
}

#[derive(Debug, Clone, Copy)]
struct Windows {
    blocks: u64,
    tokens: u64,
    proposals: u64,
}

/// Sole writer of the `ViewStore`.
///
/// Each refresh starts from the current snapshot, re-reads the planned parts
/// and publishes the result in one swap. When a count read fails nothing is
/// published and the previous snapshot stays current.
pub struct Synchronizer {
    reader: Arc<ChainReader>,
    wallet: Arc<WalletAdapter>,
    store: Arc<ViewStore>,
    windows: Windows,
    write_lock: Mutex<()>,
}

impl Synchronizer {
    pub fn new(
        config: &SyncConfig,
        reader: Arc<ChainReader>,
        wallet: Arc<WalletAdapter>,
        store: Arc<ViewStore>,
    ) -> Self {
        Self {
            reader,
            wallet,
            store,
            windows: Windows {
                blocks: config.block_window,
                tokens: config.token_window,
                proposals: config.proposal_window,
            },
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<ViewStore> {
        &self.store
    }

    pub async fn initial_sync(&self) -> Result<Arc<ViewSnapshot>, SyncError> {
        self.refresh(RefreshPlan::all()).await
    }

    /// Publishes an empty snapshot, e.g. after the wallet switched networks.
    pub async fn invalidate(&self) -> Arc<ViewSnapshot> {
        let _guard = self.write_lock.lock().await;
        info!("View invalidated");
        self.store.invalidate()
    }

    async fn rebuild(&self, plan: RefreshPlan) -> Result<ViewSnapshot, SyncError> {
        let mut next = (*self.store.snapshot()).clone();

        if plan.balance {
            if let Err(e) = self.wallet.refresh_balance().await {
                warn!(error = %e, "Balance refresh failed");
            }
        }
        let account = self.wallet.get_account().await;
        let account_changed =
            account.as_ref().map(|a| a.address) != next.account.as_ref().map(|a| a.address);
        let want_owned = account.is_some() && (plan.owned || account_changed);

        // counts first: a failure here aborts before anything is published
        let contract = if plan.contract {
            Some(self.reader.read_contract_info().await?)
        } else {
            None
        };
        let governance = if plan.governance {
            Some(self.reader.read_governance_params().await?)
        } else {
            None
        };

        let block_count = match (&contract, plan.blocks) {
            (Some(info), _) => info.block_count,
            (None, true) => self.reader.block_count().await?,
            (None, false) => next.block_count,
        };
        let total_supply = match (&contract, plan.tokens) {
            (Some(info), _) => info.total_supply,
            (None, true) => self.reader.total_supply().await?,
            (None, false) => next.total_supply,
        };
        // the published count moves only with the token window; the scan wants the live one
        let scan_supply = if want_owned && contract.is_none() && !plan.tokens {
            self.reader.total_supply().await?
        } else {
            total_supply
        };
        let proposal_count = match (&governance, plan.proposals) {
            (Some(params), _) => params.proposal_count,
            (None, true) => self.reader.proposal_count().await?,
            (None, false) => next.proposal_count,
        };

        let reader = &self.reader;
        let windows = self.windows;
        let owner = account.as_ref().map(|a| a.address);
        let (blocks, tokens, proposals, owned) = tokio::join!(
            async {
                if plan.blocks {
                    Some(reader.blocks_in_window(block_count, windows.blocks).await)
                } else {
                    None
                }
            },
            async {
                if plan.tokens {
                    Some(reader.tokens_in_window(total_supply, windows.tokens).await)
                } else {
                    None
                }
            },
            async {
                if plan.proposals {
                    Some(reader.proposals_in_window(proposal_count, windows.proposals).await)
                } else {
                    None
                }
            },
            async {
                match owner {
                    Some(owner) if want_owned => {
                        Some(reader.tokens_owned_by_in(scan_supply, owner).await)
                    }
                    _ => None,
                }
            }
        );

        if let Some(info) = contract {
            next.contract = Some(info);
        }
        if let Some(params) = governance {
            next.governance = Some(params);
        }
        next.block_count = block_count;
        next.total_supply = total_supply;
        next.proposal_count = proposal_count;
        if let Some(blocks) = blocks {
            next.blocks = blocks;
        }
        if let Some(tokens) = tokens {
            next.tokens = tokens;
        }
        if let Some(proposals) = proposals {
            next.proposals = proposals;
        }
        match owned {
            Some(owned) => next.owned_tokens = owned,
            None if account.is_none() => next.owned_tokens.clear(),
            None => {}
        }
        next.account = account;
        next.fetched_at = unix_now();
        Ok(next)
    }
}

#[async_trait]
impl SnapshotRefresher for Synchronizer {
    #[instrument(skip(self))]
    async fn refresh(&self, plan: RefreshPlan) -> Result<Arc<ViewSnapshot>, SyncError> {
        let _guard = self.write_lock.lock().await;
        match self.rebuild(plan).await {
            Ok(next) => {
                let published = self.store.publish(next);
                debug!(version = published.version, "Snapshot published");
                Ok(published)
            }
            Err(e) => {
                warn!(error = %e, "Refresh failed, keeping previous snapshot");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{addr, MockContract, MockWalletProvider, SEED_OWNER};
    use crate::contract::WriteCall;
    use ethers::types::U256;

    struct Fixture {
        mock: Arc<MockContract>,
        wallet: Arc<WalletAdapter>,
        sync: Synchronizer,
    }

    fn fixture(tokens: u64, accounts: Vec<ethers::types::Address>) -> Fixture {
        let mock = Arc::new(MockContract::seeded(tokens));
        let wallet = Arc::new(WalletAdapter::new(Arc::new(MockWalletProvider::new(accounts, 31337))));
        let reader = Arc::new(ChainReader::new(mock.clone(), 3));
        let sync = Synchronizer::new(
            &SyncConfig::default(),
            reader,
            wallet.clone(),
            Arc::new(ViewStore::new()),
        );
        Fixture { mock, wallet, sync }
    }

    #[tokio::test]
    async fn test_initial_sync_assembles_snapshot() {
        let f = fixture(12, vec![SEED_OWNER]);
        f.wallet.connect().await.unwrap();
        f.mock.add_proposal(0, 1);

        let snapshot = f.sync.initial_sync().await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.total_supply, 12);
        assert_eq!(snapshot.block_count, 13);
        assert_eq!(
            snapshot.tokens.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![11, 10, 9, 8, 7]
        );
        assert_eq!(snapshot.blocks[0].index, 12);
        assert_eq!(snapshot.proposals.len(), 1);
        assert_eq!(snapshot.owned_tokens.len(), 12);
        assert_eq!(snapshot.governance.as_ref().unwrap().governance_threshold, 51);
        assert!(snapshot.contract.as_ref().unwrap().chain_valid.unwrap());
    }

    #[tokio::test]
    async fn test_count_failure_keeps_previous_snapshot() {
        let f = fixture(4, vec![]);
        let first = f.sync.initial_sync().await.unwrap();

        f.mock.external(addr(9), WriteCall::Mint {
            metadata: "x".into(),
            value: U256::zero(),
        });
        f.mock.fail_counts(true);
        assert!(f.sync.refresh(RefreshPlan::all()).await.is_err());

        let current = f.sync.store().snapshot();
        assert_eq!(current.version, first.version);
        assert_eq!(current.total_supply, 4);
    }

    #[tokio::test]
    async fn test_count_and_newest_block_published_together() {
        let f = fixture(2, vec![]);
        f.sync.initial_sync().await.unwrap();
        let mut rx = f.sync.store().subscribe();

        f.mock.external(addr(9), WriteCall::Mint {
            metadata: "x".into(),
            value: U256::zero(),
        });
        f.sync.refresh(RefreshPlan::for_action(ActionKind::Mint)).await.unwrap();

        rx.changed().await.unwrap();
        let seen = rx.borrow().clone();
        assert_eq!(seen.block_count, 4);
        assert_eq!(seen.blocks[0].index, seen.block_count - 1);
        assert_eq!(seen.tokens[0].id, seen.total_supply - 1);
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let f = fixture(6, vec![]);
        f.mock.fail_block(4);
        let snapshot = f.sync.initial_sync().await.unwrap();
        let indices: Vec<u64> = snapshot.blocks.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![6, 5, 3, 2]);
        assert_eq!(snapshot.tokens.len(), 5);
    }

    #[tokio::test]
    async fn test_scoped_refresh_keeps_other_parts() {
        let f = fixture(3, vec![]);
        let first = f.sync.initial_sync().await.unwrap();
        let proposal = f.mock.add_proposal(0, u64::MAX);

        let next = f.sync.refresh(RefreshPlan::for_action(ActionKind::Vote)).await.unwrap();
        assert_eq!(next.proposals[0].id, proposal);
        assert_eq!(next.tokens, first.tokens);
        assert_eq!(next.blocks, first.blocks);
        assert_eq!(next.version, first.version + 1);
    }

    #[tokio::test]
    async fn test_account_refresh_keeps_supply_with_token_window() {
        let f = fixture(3, vec![SEED_OWNER]);
        f.wallet.connect().await.unwrap();
        f.sync.initial_sync().await.unwrap();

        f.mock.external(SEED_OWNER, WriteCall::Mint {
            metadata: "elsewhere".into(),
            value: U256::zero(),
        });
        let next = f.sync.refresh(RefreshPlan::account()).await.unwrap();
        assert_eq!(next.total_supply, 3);
        assert_eq!(next.tokens[0].id, next.total_supply - 1);
        assert_eq!(next.block_count, 4);
        assert_eq!(next.blocks[0].index, next.block_count - 1);
        // the ownership scan still sees the new token
        assert_eq!(next.owned_tokens.len(), 4);
    }

    #[tokio::test]
    async fn test_account_removal_clears_owned_tokens() {
        let f = fixture(3, vec![SEED_OWNER]);
        f.wallet.connect().await.unwrap();
        assert_eq!(f.sync.initial_sync().await.unwrap().owned_tokens.len(), 3);

        f.wallet.disconnect().await;
        let next = f.sync.refresh(RefreshPlan::account()).await.unwrap();
        assert!(next.account.is_none());
        assert!(next.owned_tokens.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_empties_view() {
        let f = fixture(3, vec![]);
        f.sync.initial_sync().await.unwrap();
        let cleared = f.sync.invalidate().await;
        assert!(cleared.is_empty());
        assert_eq!(cleared.version, 2);
    }

    #[test]
    fn test_event_plans() {
        let minted = ContractEvent::TokenMinted {
            token_id: 1,
            owner: addr(1),
            block_number: 2,
        };
        assert!(RefreshPlan::for_event(&minted).tokens);
        assert!(!RefreshPlan::for_event(&minted).owned);
        let executed = ContractEvent::ProposalExecuted {
            proposal_id: 0,
            passed: true,
        };
        assert!(RefreshPlan::for_event(&executed).is_empty());
        assert_eq!(
            RefreshPlan::default().merge(RefreshPlan::all()),
            RefreshPlan::all()
        );
    }
}
