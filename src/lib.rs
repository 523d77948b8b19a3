//! PRX Chain View
//!
//! Keeps a local, consistent view of a deployed PRXTokenChain contract in sync
//! with the chain: recent blocks, tokens, governance proposals and the
//! connected wallet's holdings, plus the writes that change them.

pub mod config;
pub mod contract;
pub mod error;
pub mod logging;
pub mod notify;
pub mod reader;
pub mod reconciler;
pub mod storage;
pub mod store;
pub mod submitter;
pub mod sync;
pub mod types;
pub mod utils;
pub mod view;
pub mod wallet;

#[cfg(test)]
mod testing;

pub use config::{SyncConfig, SyncConfigBuilder};
pub use contract::{ChainContract, ContractEvent, EthersContract, WriteCall};
pub use error::SyncError;
pub use notify::{Notification, NotificationLevel, Notifier};
pub use reader::ChainReader;
pub use reconciler::EventReconciler;
pub use storage::{JsonFileStore, LocalStore, MemoryStore};
pub use store::ViewStore;
pub use submitter::{Confirmation, TransactionSubmitter, TxOutcome, TxPhase, TxUpdate};
pub use sync::{RefreshPlan, SnapshotRefresher, Synchronizer};
pub use types::*;
pub use view::ChainView;
pub use wallet::{RpcWalletProvider, WalletAdapter, WalletEvent, WalletProvider};

pub type Result<T> = std::result::Result<T, SyncError>;
