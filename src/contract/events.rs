use ethers::abi::{Abi, Log as ParsedLog, RawLog, Token};
use ethers::types::{Address, Log, TxHash, H256, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SyncError;

/// Typed `PRXTokenChain` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    BlockMined {
        block_number: u64,
        block_hash: H256,
    },
    TokenMinted {
        token_id: u64,
        owner: Address,
        block_number: u64,
    },
    TokenTransferred {
        from: Address,
        to: Address,
        token_id: u64,
    },
    ContentLinked {
        token_id: u64,
        content_uri: String,
        content_type: String,
    },
    ProposalCreated {
        proposal_id: u64,
        proposer: Address,
        description: String,
        start_time: u64,
        end_time: u64,
    },
    Voted {
        proposal_id: u64,
        voter: Address,
        support: bool,
        weight: U256,
    },
    ProposalExecuted {
        proposal_id: u64,
        passed: bool,
    },
}

impl ContractEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ContractEvent::BlockMined { .. } => "BlockMined",
            ContractEvent::TokenMinted { .. } => "TokenMinted",
            ContractEvent::TokenTransferred { .. } => "TokenTransferred",
            ContractEvent::ContentLinked { .. } => "ContentLinked",
            ContractEvent::ProposalCreated { .. } => "ProposalCreated",
            ContractEvent::Voted { .. } => "Voted",
            ContractEvent::ProposalExecuted { .. } => "ProposalExecuted",
        }
    }

    /// The account that caused the event, when the payload names one.
    pub fn actor(&self) -> Option<Address> {
        match self {
            ContractEvent::TokenMinted { owner, .. } => Some(*owner),
            ContractEvent::TokenTransferred { from, .. } => Some(*from),
            ContractEvent::ProposalCreated { proposer, .. } => Some(*proposer),
            ContractEvent::Voted { voter, .. } => Some(*voter),
            _ => None,
        }
    }

    /// Events from other clients that make the local view stale.
    pub fn is_reconciled(&self) -> bool {
        matches!(
            self,
            ContractEvent::TokenMinted { .. }
                | ContractEvent::ProposalCreated { .. }
                | ContractEvent::Voted { .. }
        )
    }
}

/// A decoded event together with where it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: ContractEvent,
    pub block_number: Option<u64>,
    pub tx_hash: Option<TxHash>,
    pub log_index: Option<U256>,
}

/// Decodes a raw log against the contract ABI. Logs of unknown events yield `None`.
pub fn decode_log(abi: &Abi, log: &Log) -> Result<Option<EventRecord>, SyncError> {
    let Some(topic0) = log.topics.first().copied() else {
        return Ok(None);
    };
    let Some(event) = abi.events().find(|e| e.signature() == topic0) else {
        debug!(topic = ?topic0, "Skipping log of unknown event");
        return Ok(None);
    };

    let parsed = event.parse_log(RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    })?;

    let fields = LogFields(&parsed);
    let decoded = match event.name.as_str() {
        "BlockMined" => ContractEvent::BlockMined {
            block_number: fields.u64("blockNumber")?,
            block_hash: fields.hash("blockHash")?,
        },
        "TokenMinted" => ContractEvent::TokenMinted {
            token_id: fields.u64("tokenId")?,
            owner: fields.address("owner")?,
            block_number: fields.u64("blockNumber")?,
        },
        "TokenTransferred" => ContractEvent::TokenTransferred {
            from: fields.address("from")?,
            to: fields.address("to")?,
            token_id: fields.u64("tokenId")?,
        },
        "ContentLinked" => ContractEvent::ContentLinked {
            token_id: fields.u64("tokenId")?,
            content_uri: fields.string("contentURI")?,
            content_type: fields.string("contentType")?,
        },
        "ProposalCreated" => ContractEvent::ProposalCreated {
            proposal_id: fields.u64("proposalId")?,
            proposer: fields.address("proposer")?,
            description: fields.string("description")?,
            start_time: fields.u64("startTime")?,
            end_time: fields.u64("endTime")?,
        },
        "Voted" => ContractEvent::Voted {
            proposal_id: fields.u64("proposalId")?,
            voter: fields.address("voter")?,
            support: fields.bool("support")?,
            weight: fields.uint("weight")?,
        },
        "ProposalExecuted" => ContractEvent::ProposalExecuted {
            proposal_id: fields.u64("proposalId")?,
            passed: fields.bool("passed")?,
        },
        other => {
            debug!(event = other, "No typed mapping for event");
            return Ok(None);
        }
    };

    Ok(Some(EventRecord {
        event: decoded,
        block_number: log.block_number.map(|n| n.as_u64()),
        tx_hash: log.transaction_hash,
        log_index: log.log_index,
    }))
}

/// Checked narrowing of on-chain integers used as ids, counts and timestamps.
pub fn u256_to_u64(value: U256, what: &str) -> Result<u64, SyncError> {
    if value > U256::from(u64::MAX) {
        return Err(SyncError::DecodeError(format!("{} does not fit in u64: {}", what, value)));
    }
    Ok(value.as_u64())
}

struct LogFields<'a>(&'a ParsedLog);

impl LogFields<'_> {
    fn token(&self, name: &str) -> Result<Token, SyncError> {
        self.0
            .params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.clone())
            .ok_or_else(|| SyncError::DecodeError(format!("log is missing field {}", name)))
    }

    fn mismatch(name: &str, expected: &str) -> SyncError {
        SyncError::DecodeError(format!("log field {} is not {}", name, expected))
    }

    fn uint(&self, name: &str) -> Result<U256, SyncError> {
        self.token(name)?.into_uint().ok_or_else(|| Self::mismatch(name, "uint"))
    }

    fn u64(&self, name: &str) -> Result<u64, SyncError> {
        u256_to_u64(self.uint(name)?, name)
    }

    fn address(&self, name: &str) -> Result<Address, SyncError> {
        self.token(name)?.into_address().ok_or_else(|| Self::mismatch(name, "address"))
    }

    fn string(&self, name: &str) -> Result<String, SyncError> {
        self.token(name)?.into_string().ok_or_else(|| Self::mismatch(name, "string"))
    }

    fn bool(&self, name: &str) -> Result<bool, SyncError> {
        self.token(name)?.into_bool().ok_or_else(|| Self::mismatch(name, "bool"))
    }

    fn hash(&self, name: &str) -> Result<H256, SyncError> {
        let bytes = self
            .token(name)?
            .into_fixed_bytes()
            .ok_or_else(|| Self::mismatch(name, "bytes32"))?;
        if bytes.len() != 32 {
            return Err(Self::mismatch(name, "bytes32"));
        }
        Ok(H256::from_slice(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::prx_abi;
    use ethers::types::{Bytes, U64};

    fn topic_u64(value: u64) -> H256 {
        H256::from_low_u64_be(value)
    }

    fn topic_address(address: Address) -> H256 {
        H256::from(address)
    }

    fn log_for(event: &str, topics: Vec<H256>, data: Vec<Token>) -> Log {
        let abi = prx_abi().unwrap();
        let signature = abi.event(event).unwrap().signature();
        let mut all_topics = vec![signature];
        all_topics.extend(topics);
        Log {
            topics: all_topics,
            data: Bytes::from(ethers::abi::encode(&data)),
            block_number: Some(U64::from(42)),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_token_minted() {
        let abi = prx_abi().unwrap();
        let owner = Address::from_low_u64_be(0xaa);
        let log = log_for(
            "TokenMinted",
            vec![topic_u64(7), topic_address(owner)],
            vec![Token::Uint(U256::from(8))],
        );

        let record = decode_log(&abi, &log).unwrap().unwrap();
        assert_eq!(record.block_number, Some(42));
        assert_eq!(
            record.event,
            ContractEvent::TokenMinted {
                token_id: 7,
                owner,
                block_number: 8
            }
        );
        assert_eq!(record.event.actor(), Some(owner));
        assert!(record.event.is_reconciled());
    }

    #[test]
    fn test_decode_proposal_created() {
        let abi = prx_abi().unwrap();
        let proposer = Address::from_low_u64_be(0xbb);
        let log = log_for(
            "ProposalCreated",
            vec![topic_u64(3), topic_address(proposer)],
            vec![
                Token::String("Lower the mint price".into()),
                Token::Uint(U256::from(1_700_000_000u64)),
                Token::Uint(U256::from(1_700_086_400u64)),
            ],
        );

        match decode_log(&abi, &log).unwrap().unwrap().event {
            ContractEvent::ProposalCreated {
                proposal_id,
                description,
                end_time,
                ..
            } => {
                assert_eq!(proposal_id, 3);
                assert_eq!(description, "Lower the mint price");
                assert_eq!(end_time, 1_700_086_400);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_topic_is_skipped() {
        let abi = prx_abi().unwrap();
        let log = Log {
            topics: vec![H256::repeat_byte(0x11)],
            ..Default::default()
        };
        assert!(decode_log(&abi, &log).unwrap().is_none());
        assert!(decode_log(&abi, &Log::default()).unwrap().is_none());
    }

    #[test]
    fn test_executed_event_has_no_actor() {
        let event = ContractEvent::ProposalExecuted {
            proposal_id: 1,
            passed: true,
        };
        assert_eq!(event.actor(), None);
        assert!(!event.is_reconciled());
    }

    #[test]
    fn test_u256_narrowing() {
        assert_eq!(u256_to_u64(U256::from(5), "id").unwrap(), 5);
        assert!(u256_to_u64(U256::MAX, "id").is_err());
    }
}
