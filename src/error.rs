use ethers::contract::{AbiError, ContractError};
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use ethers::types::{Address, TxHash};

/// JSON-RPC error code a wallet returns when the user declines a prompt (EIP-1193).
pub const USER_REJECTED_CODE: i64 = 4001;

/// JSON-RPC error code a wallet returns when it is not authorized / has no accounts.
pub const UNAUTHORIZED_CODE: i64 = 4100;

/// Errors produced by the chain view synchronizer.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// No wallet provider is injected or it refused to answer
    #[error("Wallet unavailable: {0}")]
    WalletUnavailable(String),

    /// The user declined the wallet prompt
    #[error("User rejected the request")]
    UserRejected,

    /// The same logical action already has a transaction outstanding
    #[error("Action already in progress: {0}")]
    AlreadyInProgress(String),

    /// RPC or network failure while talking to the contract
    #[error("Contract unreachable: {0}")]
    ContractUnreachable(String),

    /// No contract code at the configured address
    #[error("No contract deployed at {0:?}")]
    InvalidAddress(Address),

    /// Returned data did not match the ABI
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The transaction was mined but reverted, or the node refused it
    #[error("Transaction reverted: {message}")]
    TransactionReverted {
        tx_hash: Option<TxHash>,
        message: String,
    },

    /// The transaction disappeared from the mempool
    #[error("Transaction dropped: {0:?}")]
    TransactionDropped(TxHash),

    /// A single entity in a batch could not be read
    #[error("Failed to read {entity} #{index}: {source}")]
    PartialReadFailure {
        entity: &'static str,
        index: u64,
        #[source]
        source: Box<SyncError>,
    },

    /// The contract address has not been stored locally yet
    #[error("Contract address not configured")]
    NotConfigured,

    /// The operation needs a connected account
    #[error("No account connected")]
    NotConnected,

    /// Caller supplied data rejected before touching the network
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not enough tokens held to open a proposal
    #[error("Insufficient stake: need {required} tokens, hold {held}")]
    InsufficientStake { required: u64, held: u64 },

    /// The caller stopped waiting; the transaction itself keeps going
    #[error("Stopped waiting for transaction {0:?}")]
    WaitCancelled(TxHash),

    /// Configuration or initialization error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Local persisted state could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Whether the error means the wallet user simply said no.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, SyncError::UserRejected)
    }

    /// Read-side errors that callers degrade to "stale/unknown" instead of surfacing.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            SyncError::ContractUnreachable(_)
                | SyncError::InvalidAddress(_)
                | SyncError::DecodeError(_)
                | SyncError::PartialReadFailure { .. }
        )
    }

    /// Classify a JSON-RPC error object returned by a node or wallet.
    pub fn from_rpc_response(code: i64, message: &str) -> Self {
        match code {
            USER_REJECTED_CODE => SyncError::UserRejected,
            UNAUTHORIZED_CODE => SyncError::WalletUnavailable(message.to_string()),
            // 3 is the geth code for "execution reverted" with data
            3 => SyncError::TransactionReverted {
                tx_hash: None,
                message: message.to_string(),
            },
            _ if message.contains("revert") => SyncError::TransactionReverted {
                tx_hash: None,
                message: message.to_string(),
            },
            _ => SyncError::ContractUnreachable(format!("RPC error {}: {}", code, message)),
        }
    }
}

impl From<ProviderError> for SyncError {
    fn from(error: ProviderError) -> Self {
        if let Some(resp) = error.as_error_response() {
            return SyncError::from_rpc_response(resp.code, &resp.message);
        }
        match error {
            ProviderError::SerdeJson(e) => SyncError::DecodeError(e.to_string()),
            ProviderError::HexError(e) => SyncError::DecodeError(format!("Hex error: {}", e)),
            ProviderError::JsonRpcClientError(e) => SyncError::ContractUnreachable(e.to_string()),
            other => SyncError::ContractUnreachable(other.to_string()),
        }
    }
}

impl From<ContractError<Provider<Http>>> for SyncError {
    fn from(error: ContractError<Provider<Http>>) -> Self {
        match error {
            ContractError::DecodingError(e) => SyncError::DecodeError(e.to_string()),
            ContractError::AbiError(e) => SyncError::DecodeError(e.to_string()),
            ContractError::DetokenizationError(e) => SyncError::DecodeError(e.to_string()),
            ContractError::MiddlewareError { e } => e.into(),
            ContractError::ProviderError { e } => e.into(),
            ContractError::Revert(data) => SyncError::TransactionReverted {
                tx_hash: None,
                message: decode_revert_reason(&data),
            },
            ContractError::ContractNotDeployed => {
                SyncError::Configuration("contract not deployed".to_string())
            }
            other => SyncError::ContractUnreachable(other.to_string()),
        }
    }
}

impl From<AbiError> for SyncError {
    fn from(error: AbiError) -> Self {
        SyncError::DecodeError(error.to_string())
    }
}

impl From<ethers::abi::Error> for SyncError {
    fn from(error: ethers::abi::Error) -> Self {
        SyncError::DecodeError(error.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(error: std::io::Error) -> Self {
        SyncError::Storage(error.to_string())
    }
}

/// Selector of the solidity `Error(string)` revert payload.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Extracts the human-readable reason from revert data, falling back to hex.
pub fn decode_revert_reason(data: &[u8]) -> String {
    if data.len() > 4 && data[..4] == ERROR_STRING_SELECTOR {
        if let Ok(mut tokens) = ethers::abi::decode(&[ethers::abi::ParamType::String], &data[4..]) {
            if let Some(reason) = tokens.pop().and_then(|t| t.into_string()) {
                return reason;
            }
        }
    }
    if data.is_empty() {
        "execution reverted".to_string()
    } else {
        format!("execution reverted: 0x{}", hex::encode(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::Token;

    #[test]
    fn test_rpc_code_classification() {
        assert!(SyncError::from_rpc_response(4001, "User denied").is_user_rejection());
        assert!(matches!(
            SyncError::from_rpc_response(-32000, "execution reverted: not owner"),
            SyncError::TransactionReverted { .. }
        ));
        assert!(matches!(
            SyncError::from_rpc_response(-32603, "internal error"),
            SyncError::ContractUnreachable(_)
        ));
        assert!(matches!(
            SyncError::from_rpc_response(4100, "unauthorized"),
            SyncError::WalletUnavailable(_)
        ));
    }

    #[test]
    fn test_decode_revert_reason() {
        let mut data = ERROR_STRING_SELECTOR.to_vec();
        data.extend(ethers::abi::encode(&[Token::String("Insufficient payment".into())]));
        assert_eq!(decode_revert_reason(&data), "Insufficient payment");
        assert_eq!(decode_revert_reason(&[]), "execution reverted");
        assert_eq!(decode_revert_reason(&[0xde, 0xad]), "execution reverted: 0xdead");
    }

    #[test]
    fn test_degradable_errors() {
        assert!(SyncError::DecodeError("x".into()).is_degradable());
        assert!(SyncError::InvalidAddress(Address::zero()).is_degradable());
        assert!(!SyncError::UserRejected.is_degradable());
        assert!(!SyncError::AlreadyInProgress("mint".into()).is_degradable());
    }
}
