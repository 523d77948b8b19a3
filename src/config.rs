use std::time::Duration;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SyncError;

/// Default number of confirmations before a transaction counts as confirmed
pub const DEFAULT_CONFIRMATIONS: usize = 1;

/// Default timeout for RPC requests
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed reads
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between read retries (exponential backoff)
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Size of each "recent" window
pub const DEFAULT_WINDOW: u64 = 5;

/// Concurrent per-index reads within one window
pub const DEFAULT_READ_CONCURRENCY: usize = 4;

/// Notifications dismiss themselves after this long
pub const DEFAULT_NOTIFICATION_TTL: Duration = Duration::from_secs(5);

/// Configuration for one chain view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Chain ID of the network the contract lives on
    pub chain_id: u64,
    /// Overrides the locally persisted contract address
    pub contract_address: Option<Address>,
    /// Confirmations to wait for on writes
    pub confirmations: usize,
    pub rpc_timeout: Duration,
    pub block_window: u64,
    pub token_window: u64,
    pub proposal_window: u64,
    pub read_concurrency: usize,
    /// How often the event reconciler polls for logs
    pub event_poll_interval: Duration,
    /// How often the RPC wallet provider polls accounts and chain id
    pub wallet_poll_interval: Duration,
    pub notification_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig::development("http://127.0.0.1:8545".to_string())
    }
}

impl SyncConfig {
    /// Local hardhat/anvil node
    pub fn development(rpc_url: String) -> Self {
        Self {
            rpc_url,
            chain_id: 31337,
            contract_address: None,
            confirmations: DEFAULT_CONFIRMATIONS,
            rpc_timeout: Duration::from_secs(5),
            block_window: DEFAULT_WINDOW,
            token_window: DEFAULT_WINDOW,
            proposal_window: DEFAULT_WINDOW,
            read_concurrency: DEFAULT_READ_CONCURRENCY,
            event_poll_interval: Duration::from_secs(2),
            wallet_poll_interval: Duration::from_secs(1),
            notification_ttl: DEFAULT_NOTIFICATION_TTL,
        }
    }

    pub fn sepolia(rpc_url: String) -> Self {
        Self {
            chain_id: 11155111,
            confirmations: 2,
            rpc_timeout: Duration::from_secs(15),
            event_poll_interval: Duration::from_secs(12),
            wallet_poll_interval: Duration::from_secs(2),
            ..SyncConfig::development(rpc_url)
        }
    }

    pub fn mainnet(rpc_url: String) -> Self {
        Self {
            chain_id: 1,
            confirmations: 3,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            event_poll_interval: Duration::from_secs(12),
            wallet_poll_interval: Duration::from_secs(2),
            ..SyncConfig::development(rpc_url)
        }
    }

    /// Parses a JSON document; missing fields fall back to the development preset.
    pub fn from_json_str(json: &str) -> Result<Self, SyncError> {
        let config: SyncConfig = serde_json::from_str(json)
            .map_err(|e| SyncError::Configuration(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if !self.rpc_url.starts_with("http://") && !self.rpc_url.starts_with("https://") {
            return Err(SyncError::Configuration(
                "RPC URL must start with http:// or https://".to_string(),
            ));
        }

        if self.chain_id == 0 {
            return Err(SyncError::Configuration("Chain ID cannot be zero".to_string()));
        }

        if self.contract_address == Some(Address::zero()) {
            return Err(SyncError::Configuration(
                "Contract address cannot be zero address".to_string(),
            ));
        }

        if self.block_window == 0 || self.token_window == 0 || self.proposal_window == 0 {
            return Err(SyncError::Configuration("Read windows must be non-zero".to_string()));
        }

        if self.read_concurrency == 0 {
            return Err(SyncError::Configuration(
                "Read concurrency must be at least 1".to_string(),
            ));
        }

        if self.event_poll_interval.is_zero() || self.wallet_poll_interval.is_zero() {
            return Err(SyncError::Configuration("Poll intervals must be non-zero".to_string()));
        }

        if self.block_window > 100 || self.token_window > 100 || self.proposal_window > 100 {
            warn!("Read windows above 100 entries make every refresh slow");
        }

        Ok(())
    }
}

/// Builder pattern for SyncConfig
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new(rpc_url: String, chain_id: u64) -> Self {
        Self {
            config: SyncConfig {
                chain_id,
                ..SyncConfig::development(rpc_url)
            },
        }
    }

    pub fn contract_address(mut self, address: Address) -> Self {
        self.config.contract_address = Some(address);
        self
    }

    pub fn confirmations(mut self, confirmations: usize) -> Self {
        self.config.confirmations = confirmations;
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.config.rpc_timeout = timeout;
        self
    }

    /// Sets the block, token and proposal windows at once.
    pub fn window(mut self, size: u64) -> Self {
        self.config.block_window = size;
        self.config.token_window = size;
        self.config.proposal_window = size;
        self
    }

    pub fn read_concurrency(mut self, concurrency: usize) -> Self {
        self.config.read_concurrency = concurrency;
        self
    }

    pub fn event_poll_interval(mut self, interval: Duration) -> Self {
        self.config.event_poll_interval = interval;
        self
    }

    pub fn wallet_poll_interval(mut self, interval: Duration) -> Self {
        self.config.wallet_poll_interval = interval;
        self
    }

    pub fn notification_ttl(mut self, ttl: Duration) -> Self {
        self.config.notification_ttl = ttl;
        self
    }

    pub fn build(self) -> Result<SyncConfig, SyncError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
