pub mod adapter;
pub mod provider;

pub use adapter::{WalletAdapter, WalletChange};
pub use provider::{RpcWalletProvider, WalletEvent, WalletProvider};
