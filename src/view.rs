use std::sync::Arc;

use ethers::types::{Address, Bytes};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::SyncConfig;
use crate::contract::{ChainContract, EthersContract, WriteCall};
use crate::error::SyncError;
use crate::notify::{Notification, Notifier};
use crate::reader::ChainReader;
use crate::reconciler::EventReconciler;
use crate::storage::{
    resolve_contract_address, set_wallet_session_flag, store_contract_address,
    wallet_session_flag, LocalStore,
};
use crate::store::ViewStore;
use crate::submitter::{Confirmation, TransactionSubmitter, TxOutcome, TxUpdate};
use crate::sync::{RefreshPlan, SnapshotRefresher, Synchronizer};
use crate::types::{required_proposal_stake, Account, SearchResult, ViewSnapshot};
use crate::wallet::{WalletAdapter, WalletChange, WalletEvent, WalletProvider};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// One chain view: a contract binding, a wallet and everything wired between them.
pub struct ChainView {
    local: Arc<dyn LocalStore>,
    contract: Arc<dyn ChainContract>,
    wallet: Arc<WalletAdapter>,
    reader: Arc<ChainReader>,
    sync: Arc<Synchronizer>,
    submitter: TransactionSubmitter,
    reconciler: Arc<EventReconciler>,
    notifier: Arc<Notifier>,
}

impl ChainView {
    /// Binds to the configured or stored contract over JSON-RPC.
    ///
    /// Fails with `NotConfigured` when neither is available.
    #[instrument(skip_all, fields(rpc = %config.rpc_url))]
    pub async fn open(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        wallet: Arc<dyn WalletProvider>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let address = resolve_contract_address(local.as_ref(), config.contract_address)?;
        let contract = EthersContract::connect(&config, address).await?;
        if config.contract_address.is_some() {
            store_contract_address(local.as_ref(), address)?;
        }
        Ok(Self::with_contract(&config, local, wallet, Arc::new(contract)))
    }

    pub fn with_contract(
        config: &SyncConfig,
        local: Arc<dyn LocalStore>,
        wallet: Arc<dyn WalletProvider>,
        contract: Arc<dyn ChainContract>,
    ) -> Self {
        let wallet = Arc::new(WalletAdapter::new(wallet));
        let reader = Arc::new(ChainReader::new(Arc::clone(&contract), config.read_concurrency));
        let sync = Arc::new(Synchronizer::new(
            config,
            Arc::clone(&reader),
            Arc::clone(&wallet),
            Arc::new(ViewStore::new()),
        ));
        let refresher: Arc<dyn SnapshotRefresher> = sync.clone();
        let submitter = TransactionSubmitter::new(Arc::clone(&contract), Arc::clone(&refresher));
        let reconciler = Arc::new(EventReconciler::new(
            Arc::clone(&contract),
            Arc::clone(&wallet),
            refresher,
            config.event_poll_interval,
        ));
        Self {
            local,
            contract,
            wallet,
            reader,
            sync,
            submitter,
            reconciler,
            notifier: Arc::new(Notifier::new(config.notification_ttl)),
        }
    }

    pub fn snapshot(&self) -> Arc<ViewSnapshot> {
        self.sync.store().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ViewSnapshot>> {
        self.sync.store().subscribe()
    }

    pub fn tx_updates(&self) -> broadcast::Receiver<TxUpdate> {
        self.submitter.subscribe()
    }

    pub fn notifications(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn active_notifications(&self) -> Vec<Notification> {
        self.notifier.active()
    }

    pub fn wallet(&self) -> &Arc<WalletAdapter> {
        &self.wallet
    }

    pub fn reader(&self) -> &Arc<ChainReader> {
        &self.reader
    }

    pub fn contract_address(&self) -> Address {
        self.contract.address()
    }

    pub async fn connect_wallet(&self) -> Result<Account, SyncError> {
        let connected = async {
            let account = self.wallet.connect().await?;
            set_wallet_session_flag(self.local.as_ref(), true)?;
            Ok::<_, SyncError>(account)
        }
        .await;
        let account = connected.map_err(|e| self.reject("Wallet connection", e))?;
        self.notifier.success("Wallet connected");
        self.refresh_quietly(RefreshPlan::account()).await;
        Ok(account)
    }

    /// Reconnects without a prompt when the previous session left the flag set.
    pub async fn restore_session(&self) -> Result<Option<Account>, SyncError> {
        if !wallet_session_flag(self.local.as_ref()) {
            return Ok(None);
        }
        let restored = async {
            match self.wallet.check_existing().await? {
                Some(account) => {
                    debug!(account = %account.checksummed(), "Wallet session restored");
                    Ok::<_, SyncError>(Some(account))
                }
                None => {
                    set_wallet_session_flag(self.local.as_ref(), false)?;
                    Ok(None)
                }
            }
        }
        .await;
        restored.map_err(|e| self.reject("Restoring wallet session", e))
    }

    pub async fn initial_sync(&self) -> Result<Arc<ViewSnapshot>, SyncError> {
        self.sync
            .initial_sync()
            .await
            .map_err(|e| self.reject("Loading chain data", e))
    }

    pub async fn disconnect(&self) -> Result<(), SyncError> {
        self.wallet.disconnect().await;
        set_wallet_session_flag(self.local.as_ref(), false).map_err(|e| self.reject("Disconnect", e))?;
        self.refresh_quietly(RefreshPlan::account()).await;
        self.notifier.info("Wallet disconnected");
        Ok(())
    }

    /// Mints a token, paying the current mint price.
    pub async fn mint(&self, metadata: &str, cancel: &CancellationToken) -> Result<Confirmation, SyncError> {
        let prepared = async {
            let metadata = required("Metadata", metadata)?;
            let from = self.require_account().await?;
            let value = self.contract.mint_price().await?;
            Ok::<_, SyncError>((from, WriteCall::Mint { metadata, value }))
        }
        .await;
        self.write("Mint", prepared, cancel).await
    }

    pub async fn mint_with_content(
        &self,
        metadata: &str,
        content_uri: &str,
        content_type: &str,
        is_private: bool,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, SyncError> {
        let prepared = async {
            let metadata = required("Metadata", metadata)?;
            let content_uri = required("Content URI", content_uri)?;
            let content_type = required("Content type", content_type)?;
            let from = self.require_account().await?;
            let call = WriteCall::MintWithContent {
                metadata,
                content_uri,
                content_type,
                is_private,
                value: self.contract.mint_price().await?,
            };
            Ok::<_, SyncError>((from, call))
        }
        .await;
        self.write("Mint", prepared, cancel).await
    }

    pub async fn transfer(
        &self,
        token_id: u64,
        to: Address,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, SyncError> {
        let prepared = if to == Address::zero() {
            Err(SyncError::InvalidInput("recipient is the zero address".into()))
        } else {
            self.from_account(WriteCall::Transfer { to, token_id }).await
        };
        self.write("Transfer", prepared, cancel).await
    }

    /// Links `token_id` to `linked_token_id`. The link is one-directional.
    pub async fn link_content(
        &self,
        token_id: u64,
        linked_token_id: u64,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, SyncError> {
        let prepared = if token_id == linked_token_id {
            Err(SyncError::InvalidInput("cannot link a token to itself".into()))
        } else {
            self.from_account(WriteCall::LinkContent {
                token_id,
                linked_token_id,
            })
            .await
        };
        self.write("Link", prepared, cancel).await
    }

    /// Opens a proposal. Needs at least 1% of total supply in tokens.
    pub async fn create_proposal(
        &self,
        description: &str,
        voting_period_days: u64,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, SyncError> {
        let prepared = async {
            let description = required("Description", description)?;
            if voting_period_days == 0 {
                return Err(SyncError::InvalidInput("voting period must be at least one day".into()));
            }
            let from = self.require_account().await?;

            let (supply, held) =
                tokio::try_join!(self.contract.total_supply(), self.contract.balance_of(from))?;
            let required = required_proposal_stake(supply);
            if held < required {
                return Err(SyncError::InsufficientStake { required, held });
            }

            let call = WriteCall::CreateProposal {
                description,
                voting_period: voting_period_days.saturating_mul(SECONDS_PER_DAY),
                execution_data: Bytes::new(),
            };
            Ok::<_, SyncError>((from, call))
        }
        .await;
        self.write("Proposal", prepared, cancel).await
    }

    pub async fn vote(
        &self,
        proposal_id: u64,
        support: bool,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, SyncError> {
        let prepared = self
            .from_account(WriteCall::Vote {
                proposal_id,
                support,
            })
            .await;
        self.write("Vote", prepared, cancel).await
    }

    pub async fn execute_proposal(
        &self,
        proposal_id: u64,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, SyncError> {
        let prepared = self.from_account(WriteCall::ExecuteProposal { proposal_id }).await;
        self.write("Execute", prepared, cancel).await
    }

    pub async fn search(&self, query: &str) -> Result<SearchResult, SyncError> {
        self.reader
            .search(query)
            .await
            .map_err(|e| self.reject("Search", e))
    }

    /// Whether the connected account (or anyone, when disconnected) may open the content.
    pub async fn can_access_content(&self, token_id: u64) -> Result<bool, SyncError> {
        let user = self.wallet.address().await.unwrap_or_default();
        self.reader
            .can_access_content(user, token_id)
            .await
            .map_err(|e| self.reject("Content access", e))
    }

    /// Applies a wallet notification to identity and view.
    pub async fn handle_wallet_event(&self, event: WalletEvent) -> Result<(), SyncError> {
        self.apply_wallet_event(event)
            .await
            .map_err(|e| self.reject("Wallet update", e))
    }

    async fn apply_wallet_event(&self, event: WalletEvent) -> Result<(), SyncError> {
        match self.wallet.handle_event(event).await? {
            None => Ok(()),
            Some(WalletChange::Disconnected) => {
                set_wallet_session_flag(self.local.as_ref(), false)?;
                self.refresh_quietly(RefreshPlan::account()).await;
                self.notifier.info("Wallet disconnected");
                Ok(())
            }
            Some(WalletChange::AccountSwitched(account)) => {
                self.refresh_quietly(RefreshPlan::account()).await;
                self.notifier
                    .info(format!("Switched to account {}", crate::utils::format_address(&account.address)));
                Ok(())
            }
            Some(WalletChange::ChainSwitched(chain_id)) => {
                self.sync.invalidate().await;
                self.notifier.warning(format!("Network changed to chain {}", chain_id));
                self.sync.initial_sync().await.map(|_| ())
            }
        }
    }

    /// Starts the wallet event pump and the event reconciler.
    pub fn spawn_background(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let pump = {
            let view = Arc::clone(self);
            let cancel = cancel.clone();
            let mut events = self.wallet.subscribe();
            tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = events.recv() => event,
                    };
                    match event {
                        Ok(event) => {
                            if let Err(e) = view.handle_wallet_event(event).await {
                                warn!(error = %e, "Wallet event handling failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Wallet events lagged")
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                debug!("Wallet event pump stopped");
            })
        };
        let reconciler = tokio::spawn(Arc::clone(&self.reconciler).run(cancel));
        vec![pump, reconciler]
    }

    /// Submits a prepared write. Every failure, local or remote, becomes a notification.
    async fn write(
        &self,
        context: &'static str,
        prepared: Result<(Address, WriteCall), SyncError>,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, SyncError> {
        let result = match prepared {
            Ok((from, call)) => self.submitter.submit(from, call, cancel).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(confirmation) => {
                self.notifier.success(describe(&confirmation.outcome));
                Ok(confirmation)
            }
            Err(e) => Err(self.reject(context, e)),
        }
    }

    async fn from_account(&self, call: WriteCall) -> Result<(Address, WriteCall), SyncError> {
        Ok((self.require_account().await?, call))
    }

    async fn require_account(&self) -> Result<Address, SyncError> {
        self.wallet.address().await.ok_or(SyncError::NotConnected)
    }

    fn reject(&self, context: &str, error: SyncError) -> SyncError {
        self.notifier.error(context, &error);
        error
    }

    async fn refresh_quietly(&self, plan: RefreshPlan) {
        if let Err(e) = self.sync.refresh(plan).await {
            warn!(error = %e, "Refresh failed");
        }
    }
}

fn required(field: &str, value: &str) -> Result<String, SyncError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SyncError::InvalidInput(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn describe(outcome: &TxOutcome) -> String {
    let id = |id: &Option<u64>| id.map_or_else(|| "unknown".to_string(), |id| id.to_string());
    match outcome {
        TxOutcome::Minted { token_id } => format!("Token minted! Token ID: {}", id(token_id)),
        TxOutcome::Transferred { token_id, to } => {
            format!("Token #{} transferred to {}", token_id, crate::utils::format_address(to))
        }
        TxOutcome::Linked {
            token_id,
            linked_token_id,
        } => format!("Token #{} linked to #{}", token_id, linked_token_id),
        TxOutcome::ProposalCreated { proposal_id } => {
            format!("Proposal created! Proposal ID: {}", id(proposal_id))
        }
        TxOutcome::Voted {
            proposal_id,
            support,
        } => format!(
            "Vote {} proposal #{} recorded",
            if *support { "for" } else { "against" },
            proposal_id
        ),
        TxOutcome::Executed {
            proposal_id,
            passed,
        } => match passed {
            Some(true) => format!("Proposal #{} executed: passed", proposal_id),
            Some(false) => format!("Proposal #{} executed: rejected", proposal_id),
            None => format!("Proposal #{} executed", proposal_id),
        },
    }
}

impl std::fmt::Debug for ChainView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainView")
            .field("contract", &self.contract.address())
            .field("version", &self.snapshot().version)
            .finish()
    }
}
