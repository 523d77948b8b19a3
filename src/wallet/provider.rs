use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U64};
use reqwest::{Client, Url};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SyncError;

/// Notifications an injected wallet pushes without being asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// EIP-1193 style wallet: JSON-RPC requests plus change notifications.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, SyncError>;

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Wallet backed by a JSON-RPC node with unlocked accounts.
///
/// There is no prompt on a node, so `eth_requestAccounts` is answered with
/// `eth_accounts`. Changes are detected by polling.
pub struct RpcWalletProvider {
    provider: Arc<Provider<Http>>,
    events: broadcast::Sender<WalletEvent>,
    poll_interval: Duration,
}

impl RpcWalletProvider {
    pub fn new(rpc_url: &str, timeout: Duration, poll_interval: Duration) -> Result<Self, SyncError> {
        let url = Url::parse(rpc_url)
            .map_err(|e| SyncError::Configuration(format!("Invalid RPC URL: {}", e)))?;
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            SyncError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;
        let (events, _) = broadcast::channel(32);
        Ok(Self {
            provider: Arc::new(Provider::new(Http::new_with_client(url, client))),
            events,
            poll_interval,
        })
    }

    async fn accounts(&self) -> Result<Vec<Address>, SyncError> {
        Ok(self.provider.request("eth_accounts", ()).await?)
    }

    async fn chain_id(&self) -> Result<u64, SyncError> {
        let id: U64 = self.provider.request("eth_chainId", ()).await?;
        Ok(id.as_u64())
    }

    /// Polls accounts and chain id until `cancel` fires, emitting an event per change.
    pub fn spawn_watcher(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_accounts: Option<Vec<Address>> = None;
            let mut last_chain: Option<u64> = None;
            let mut ticker = tokio::time::interval(self.poll_interval);
            info!(interval = ?self.poll_interval, "Wallet watcher started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match self.accounts().await {
                    Ok(accounts) => {
                        if last_accounts.as_ref().is_some_and(|prev| prev != &accounts) {
                            let _ = self.events.send(WalletEvent::AccountsChanged(accounts.clone()));
                        }
                        last_accounts = Some(accounts);
                    }
                    Err(e) => warn!(error = %e, "Polling eth_accounts failed"),
                }

                match self.chain_id().await {
                    Ok(chain_id) => {
                        if last_chain.is_some_and(|prev| prev != chain_id) {
                            let _ = self.events.send(WalletEvent::ChainChanged(chain_id));
                        }
                        last_chain = Some(chain_id);
                    }
                    Err(e) => warn!(error = %e, "Polling eth_chainId failed"),
                }
            }
            debug!("Wallet watcher stopped");
        })
    }
}

#[async_trait]
impl WalletProvider for RpcWalletProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, SyncError> {
        let method = match method {
            "eth_requestAccounts" => "eth_accounts",
            other => other,
        };
        let params = match params {
            Value::Null => Value::Array(Vec::new()),
            other => other,
        };
        Ok(self.provider.request(method, params).await?)
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
