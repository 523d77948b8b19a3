//! Small key/value store for state that survives restarts: the contract
//! address and whether a wallet session should be restored.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use ethers::types::Address;
use tracing::{debug, warn};

use crate::error::SyncError;

/// Key holding the deployed contract address
pub const CONTRACT_ADDRESS_KEY: &str = "prxTokenChainAddress";

/// Key set to `"true"` while a wallet session should be restored on start-up
pub const WALLET_CONNECTED_KEY: &str = "walletConnected";

pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SyncError>;
    fn remove(&self, key: &str) -> Result<(), SyncError>;
}

/// Volatile store, mostly for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> SyncError {
    SyncError::Storage("store lock poisoned".to_string())
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}

/// A JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    SyncError::Storage(format!("Corrupt store file {}: {}", path.display(), e))
                })?
            }
        } else {
            HashMap::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "Opened local store");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn flush(&self, entries: &HashMap<String, String>) -> Result<(), SyncError> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl LocalStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

/// The contract address to bind to: explicit override first, then the stored one.
pub fn resolve_contract_address(
    store: &dyn LocalStore,
    override_address: Option<Address>,
) -> Result<Address, SyncError> {
    if let Some(address) = override_address {
        return Ok(address);
    }
    match store.get(CONTRACT_ADDRESS_KEY)? {
        Some(raw) => Address::from_str(raw.trim()).map_err(|e| {
            warn!(value = %raw, "Stored contract address is malformed");
            SyncError::Storage(format!("Invalid stored contract address: {}", e))
        }),
        None => Err(SyncError::NotConfigured),
    }
}

pub fn store_contract_address(store: &dyn LocalStore, address: Address) -> Result<(), SyncError> {
    store.set(CONTRACT_ADDRESS_KEY, &format!("{:#x}", address))
}

pub fn wallet_session_flag(store: &dyn LocalStore) -> bool {
    matches!(store.get(WALLET_CONNECTED_KEY), Ok(Some(v)) if v == "true")
}

pub fn set_wallet_session_flag(store: &dyn LocalStore, connected: bool) -> Result<(), SyncError> {
    if connected {
        store.set(WALLET_CONNECTED_KEY, "true")
    } else {
        store.remove(WALLET_CONNECTED_KEY)
    }
}
