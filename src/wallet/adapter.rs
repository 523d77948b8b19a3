use std::sync::{Arc, Mutex as StdMutex};

use ethers::types::{Address, U256, U64};
use ethers::utils::format_ether;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument, warn};

use super::provider::{WalletEvent, WalletProvider};
use crate::error::SyncError;
use crate::types::Account;

type AccountsListener = Arc<dyn Fn(&[Address]) + Send + Sync>;
type ChainListener = Arc<dyn Fn(u64) + Send + Sync>;

/// What a wallet notification did to the local identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletChange {
    /// Accounts list went empty
    Disconnected,
    /// First account differs from the one we had
    AccountSwitched(Account),
    /// Network switched; every cached read is stale
    ChainSwitched(u64),
}

#[derive(Default)]
struct LastSeen {
    accounts: Option<Vec<Address>>,
    chain_id: Option<u64>,
}

/// Local identity on top of a `WalletProvider`.
pub struct WalletAdapter {
    provider: Arc<dyn WalletProvider>,
    account: RwLock<Option<Account>>,
    last_seen: StdMutex<LastSeen>,
    accounts_listeners: StdMutex<Vec<AccountsListener>>,
    chain_listeners: StdMutex<Vec<ChainListener>>,
}

impl WalletAdapter {
    pub fn new(provider: Arc<dyn WalletProvider>) -> Self {
        Self {
            provider,
            account: RwLock::new(None),
            last_seen: StdMutex::new(LastSeen::default()),
            accounts_listeners: StdMutex::new(Vec::new()),
            chain_listeners: StdMutex::new(Vec::new()),
        }
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SyncError> {
        let value = self.provider.request(method, params).await.map_err(|e| match e {
            SyncError::ContractUnreachable(msg) => SyncError::WalletUnavailable(msg),
            other => other,
        })?;
        serde_json::from_value(value)
            .map_err(|e| SyncError::DecodeError(format!("{} returned unexpected data: {}", method, e)))
    }

    /// Prompts for accounts. On failure the previous identity is kept.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<Account, SyncError> {
        let accounts: Vec<Address> = self.request("eth_requestAccounts", json!([])).await?;
        let Some(first) = accounts.first().copied() else {
            return Err(SyncError::WalletUnavailable("wallet returned no accounts".to_string()));
        };
        let account = self.load_account(first).await?;
        self.adopt(accounts, account.clone()).await;
        info!(account = %account.checksummed(), chain_id = account.chain_id, "Wallet connected");
        Ok(account)
    }

    /// Reconnects silently when the wallet already authorized an account.
    #[instrument(skip(self))]
    pub async fn check_existing(&self) -> Result<Option<Account>, SyncError> {
        let accounts: Vec<Address> = self.request("eth_accounts", json!([])).await?;
        let Some(first) = accounts.first().copied() else {
            debug!("No previously authorized account");
            return Ok(None);
        };
        let account = self.load_account(first).await?;
        self.adopt(accounts, account.clone()).await;
        Ok(Some(account))
    }

    pub async fn get_account(&self) -> Option<Account> {
        self.account.read().await.clone()
    }

    pub async fn address(&self) -> Option<Address> {
        self.account.read().await.as_ref().map(|a| a.address)
    }

    /// Native balance formatted in ether.
    pub async fn get_balance(&self, address: Address) -> Result<String, SyncError> {
        Ok(format_ether(self.balance_wei(address).await?))
    }

    pub async fn chain_id(&self) -> Result<u64, SyncError> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.as_u64())
    }

    /// Re-reads the connected account's balance.
    pub async fn refresh_balance(&self) -> Result<Option<Account>, SyncError> {
        let Some(address) = self.address().await else {
            return Ok(None);
        };
        let balance = self.balance_wei(address).await?;
        let mut guard = self.account.write().await;
        // the account may have switched while the balance was in flight
        if let Some(account) = guard.as_mut().filter(|a| a.address == address) {
            account.balance = format_ether(balance);
        }
        Ok(guard.clone())
    }

    pub fn on_accounts_changed(&self, listener: impl Fn(&[Address]) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.accounts_listeners.lock() {
            listeners.push(Arc::new(listener));
        }
    }

    pub fn on_chain_changed(&self, listener: impl Fn(u64) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.chain_listeners.lock() {
            listeners.push(Arc::new(listener));
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.provider.subscribe()
    }

    /// Applies a wallet notification. Repeats of the last seen value are ignored.
    pub async fn handle_event(&self, event: WalletEvent) -> Result<Option<WalletChange>, SyncError> {
        match event {
            WalletEvent::AccountsChanged(accounts) => self.accounts_changed(accounts).await,
            WalletEvent::ChainChanged(chain_id) => Ok(self.chain_changed(chain_id).await),
        }
    }

    async fn accounts_changed(&self, accounts: Vec<Address>) -> Result<Option<WalletChange>, SyncError> {
        if self.is_repeat(&accounts) {
            return Ok(None);
        }

        let Some(first) = accounts.first().copied() else {
            self.commit_accounts(accounts);
            info!("Wallet removed all accounts");
            *self.account.write().await = None;
            return Ok(Some(WalletChange::Disconnected));
        };

        if self.address().await == Some(first) {
            self.commit_accounts(accounts);
            return Ok(None);
        }

        // the list is only recorded once the new identity loaded, so a retry is not a repeat
        let account = self.load_account(first).await?;
        self.commit_accounts(accounts);
        *self.account.write().await = Some(account.clone());
        info!(account = %account.checksummed(), "Wallet account switched");
        Ok(Some(WalletChange::AccountSwitched(account)))
    }

    async fn chain_changed(&self, chain_id: u64) -> Option<WalletChange> {
        {
            let Ok(mut last) = self.last_seen.lock() else {
                return None;
            };
            if last.chain_id == Some(chain_id) {
                return None;
            }
            last.chain_id = Some(chain_id);
        }
        let listeners = match self.chain_listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(_) => Vec::new(),
        };
        for listener in listeners {
            listener(chain_id);
        }
        if let Some(account) = self.account.write().await.as_mut() {
            account.chain_id = chain_id;
        }
        warn!(chain_id, "Wallet switched network");
        Some(WalletChange::ChainSwitched(chain_id))
    }

    /// Clears the local identity. The wallet itself stays authorized.
    pub async fn disconnect(&self) {
        *self.account.write().await = None;
        if let Ok(mut last) = self.last_seen.lock() {
            *last = LastSeen::default();
        }
        info!("Wallet disconnected");
    }

    async fn balance_wei(&self, address: Address) -> Result<U256, SyncError> {
        self.request("eth_getBalance", json!([address, "latest"])).await
    }

    async fn load_account(&self, address: Address) -> Result<Account, SyncError> {
        let balance = self.balance_wei(address).await?;
        let chain_id = self.chain_id().await?;
        Ok(Account::new(address, balance, chain_id))
    }

    async fn adopt(&self, accounts: Vec<Address>, account: Account) {
        if let Ok(mut last) = self.last_seen.lock() {
            last.accounts = Some(accounts);
            last.chain_id = Some(account.chain_id);
        }
        *self.account.write().await = Some(account);
    }

    fn is_repeat(&self, accounts: &[Address]) -> bool {
        match self.last_seen.lock() {
            Ok(last) => last.accounts.as_deref() == Some(accounts),
            Err(_) => true,
        }
    }

    fn commit_accounts(&self, accounts: Vec<Address>) {
        if let Ok(mut last) = self.last_seen.lock() {
            last.accounts = Some(accounts.clone());
        }
        let listeners = match self.accounts_listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(_) => Vec::new(),
        };
        for listener in listeners {
            listener(&accounts);
        }
    }
}
