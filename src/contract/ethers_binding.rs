use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ethers::abi::{Abi, Detokenize, Tokenize};
use ethers::contract::{Contract, ContractCall};
use ethers::providers::{Http, Middleware, PendingTransaction, Provider};
use ethers::types::{Address, Filter, TxHash, H256, U256, U64};
use tracing::{debug, info, instrument, warn};

use super::clients::RpcClient;
use super::events::{decode_log, u256_to_u64, EventRecord};
use super::{prx_abi, ChainContract, TxReceipt, WriteCall};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::types::{ChainBlock, HealthMetrics, PrxMetadata, Proposal};

type BlockTuple = (U256, U256, Address, H256, H256, String);
type MetadataTuple = (String, String, Address, U256, bool, Vec<U256>);
type ProposalTuple = (U256, String, Address, U256, U256, bool, bool, U256, U256);

/// `ChainContract` over an HTTP JSON-RPC node.
///
/// Writes go out as `eth_sendTransaction` from the connected account, so the
/// node (or the wallet behind it) does the signing.
pub struct EthersContract {
    contract: Contract<Provider<Http>>,
    abi: Abi,
    client: RpcClient,
    confirmations: usize,
}

impl EthersContract {
    /// Binds to `address`, failing with `InvalidAddress` when no code is deployed there.
    #[instrument(skip(config), fields(rpc = %config.rpc_url))]
    pub async fn connect(config: &SyncConfig, address: Address) -> Result<Self, SyncError> {
        config.validate()?;
        let client = RpcClient::new(&config.rpc_url, config.rpc_timeout)?;
        let provider = client.provider();

        let code = client
            .execute("eth_getCode", || {
                let provider = Arc::clone(&provider);
                async move { Ok::<_, SyncError>(provider.get_code(address, None).await?) }
            })
            .await?;
        if code.as_ref().is_empty() {
            warn!(contract = ?address, "No contract code at address");
            return Err(SyncError::InvalidAddress(address));
        }

        match provider.get_chainid().await {
            Ok(chain_id) if chain_id.as_u64() != config.chain_id => warn!(
                expected = config.chain_id,
                actual = chain_id.as_u64(),
                "Node reports a different chain id than configured"
            ),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Could not read chain id"),
        }

        let abi = prx_abi()?;
        let contract = Contract::new(address, abi.clone(), provider);
        info!(contract = ?address, "Contract binding ready");

        Ok(Self {
            contract,
            abi,
            client,
            confirmations: config.confirmations.max(1),
        })
    }

    pub async fn health(&self) -> HealthMetrics {
        self.client.health().await
    }

    async fn read<A, D>(&self, method: &'static str, args: A) -> Result<D, SyncError>
    where
        A: Tokenize + Clone + Send + Sync,
        D: Detokenize + Send + Sync,
    {
        self.client
            .execute(method, || {
                let args = args.clone();
                async move {
                    let call: ContractCall<Provider<Http>, D> = self.contract.method(method, args)?;
                    Ok::<_, SyncError>(call.call().await?)
                }
            })
            .await
    }

    async fn read_u64(&self, method: &'static str) -> Result<u64, SyncError> {
        let value: U256 = self.read(method, ()).await?;
        u256_to_u64(value, method)
    }

    fn build_call(&self, call: &WriteCall) -> Result<ContractCall<Provider<Http>, H256>, SyncError> {
        let method = call.method_name();
        let built = match call {
            WriteCall::Mint { metadata, .. } => self.contract.method(method, metadata.clone())?,
            WriteCall::MintWithContent {
                metadata,
                content_uri,
                content_type,
                is_private,
                ..
            } => self.contract.method(
                method,
                (
                    metadata.clone(),
                    content_uri.clone(),
                    content_type.clone(),
                    *is_private,
                ),
            )?,
            WriteCall::Transfer { to, token_id } => {
                self.contract.method(method, (*to, U256::from(*token_id)))?
            }
            WriteCall::LinkContent {
                token_id,
                linked_token_id,
            } => self
                .contract
                .method(method, (U256::from(*token_id), U256::from(*linked_token_id)))?,
            WriteCall::CreateProposal {
                description,
                voting_period,
                execution_data,
            } => self.contract.method(
                method,
                (
                    description.clone(),
                    U256::from(*voting_period),
                    execution_data.clone(),
                ),
            )?,
            WriteCall::Vote {
                proposal_id,
                support,
            } => self
                .contract
                .method(method, (U256::from(*proposal_id), *support))?,
            WriteCall::ExecuteProposal { proposal_id } => {
                self.contract.method(method, U256::from(*proposal_id))?
            }
        };
        Ok(built)
    }
}

#[async_trait]
impl ChainContract for EthersContract {
    fn address(&self) -> Address {
        self.contract.address()
    }

    async fn name(&self) -> Result<String, SyncError> {
        self.read("name", ()).await
    }

    async fn symbol(&self) -> Result<String, SyncError> {
        self.read("symbol", ()).await
    }

    async fn total_supply(&self) -> Result<u64, SyncError> {
        self.read_u64("totalSupply").await
    }

    async fn block_count(&self) -> Result<u64, SyncError> {
        self.read_u64("blockCount").await
    }

    async fn mint_price(&self) -> Result<U256, SyncError> {
        self.read("mintPrice", ()).await
    }

    async fn balance_of(&self, owner: Address) -> Result<u64, SyncError> {
        let balance: U256 = self.read("balanceOf", owner).await?;
        u256_to_u64(balance, "balanceOf")
    }

    async fn verify_chain(&self) -> Result<bool, SyncError> {
        self.read("verifyChain", ()).await
    }

    async fn get_block(&self, index: u64) -> Result<ChainBlock, SyncError> {
        let (number, timestamp, minter, previous_hash, hash, metadata): BlockTuple =
            self.read("getBlock", U256::from(index)).await?;
        Ok(ChainBlock {
            index: u256_to_u64(number, "blockNumber")?,
            timestamp: u256_to_u64(timestamp, "timestamp")?,
            minter,
            previous_hash,
            hash,
            metadata,
        })
    }

    async fn get_token(&self, token_id: u64) -> Result<(Address, String), SyncError> {
        self.read("getToken", U256::from(token_id)).await
    }

    async fn token_owner(&self, token_id: u64) -> Result<Address, SyncError> {
        self.read("tokenOwner", U256::from(token_id)).await
    }

    async fn prx_metadata(&self, token_id: u64) -> Result<PrxMetadata, SyncError> {
        let (content_uri, content_type, creator, creation_block, is_private, linked): MetadataTuple =
            self.read("prxMetadata", U256::from(token_id)).await?;
        Ok(PrxMetadata {
            content_uri,
            content_type,
            creator,
            creation_block: u256_to_u64(creation_block, "creationBlock")?,
            is_private,
            linked_tokens: linked
                .into_iter()
                .map(|id| u256_to_u64(id, "linkedTokens"))
                .collect::<Result<_, _>>()?,
        })
    }

    async fn linked_content(&self, token_id: u64) -> Result<Vec<u64>, SyncError> {
        let linked: Vec<U256> = self.read("getLinkedContent", U256::from(token_id)).await?;
        linked
            .into_iter()
            .map(|id| u256_to_u64(id, "getLinkedContent"))
            .collect()
    }

    async fn can_access_content(&self, user: Address, token_id: u64) -> Result<bool, SyncError> {
        self.read("canAccessContent", (user, U256::from(token_id)))
            .await
    }

    async fn proposal_count(&self) -> Result<u64, SyncError> {
        self.read_u64("proposalCount").await
    }

    async fn minimum_voting_period(&self) -> Result<u64, SyncError> {
        self.read_u64("minimumVotingPeriod").await
    }

    async fn minimum_votes_required(&self) -> Result<u64, SyncError> {
        self.read_u64("minimumVotesRequired").await
    }

    async fn governance_threshold(&self) -> Result<u64, SyncError> {
        self.read_u64("governanceThreshold").await
    }

    async fn proposal(&self, proposal_id: u64) -> Result<Proposal, SyncError> {
        let (id, description, proposer, start, end, executed, passed, for_votes, against_votes): ProposalTuple =
            self.read("proposals", U256::from(proposal_id)).await?;
        Ok(Proposal {
            id: u256_to_u64(id, "id")?,
            description,
            proposer,
            start_time: u256_to_u64(start, "startTime")?,
            end_time: u256_to_u64(end, "endTime")?,
            executed,
            passed,
            for_votes,
            against_votes,
        })
    }

    #[instrument(skip(self, call), fields(method = call.method_name()))]
    async fn send(&self, from: Address, call: &WriteCall) -> Result<TxHash, SyncError> {
        let mut built = self.build_call(call)?.from(from);
        let value = call.value();
        if !value.is_zero() {
            built = built.value(value);
        }

        let started = Instant::now();
        let sent = built.send().await;
        self.client.record(sent.is_ok(), started.elapsed()).await;
        let pending = sent?;
        let tx_hash = *pending;
        info!(tx = ?tx_hash, "Transaction submitted");
        Ok(tx_hash)
    }

    #[instrument(skip(self))]
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt, SyncError> {
        let provider = self.client.provider();
        let receipt = PendingTransaction::new(tx_hash, provider.as_ref())
            .confirmations(self.confirmations)
            .await?
            .ok_or(SyncError::TransactionDropped(tx_hash))?;

        if receipt.status == Some(U64::zero()) {
            warn!(tx = ?tx_hash, "Transaction reverted");
            return Err(SyncError::TransactionReverted {
                tx_hash: Some(tx_hash),
                message: "transaction reverted on-chain".to_string(),
            });
        }

        let contract_address = self.contract.address();
        let mut events = Vec::new();
        for log in receipt.logs.iter().filter(|l| l.address == contract_address) {
            match decode_log(&self.abi, log) {
                Ok(Some(record)) => events.push(record.event),
                Ok(None) => {}
                Err(e) => warn!(tx = ?tx_hash, error = %e, "Undecodable receipt log"),
            }
        }

        Ok(TxReceipt {
            tx_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            events,
        })
    }

    async fn latest_block_number(&self) -> Result<u64, SyncError> {
        let provider = self.client.provider();
        let number = self
            .client
            .execute("eth_blockNumber", || {
                let provider = Arc::clone(&provider);
                async move { Ok::<_, SyncError>(provider.get_block_number().await?) }
            })
            .await?;
        Ok(number.as_u64())
    }

    #[instrument(skip(self))]
    async fn events_between(&self, from: u64, to: u64) -> Result<Vec<EventRecord>, SyncError> {
        let provider = self.client.provider();
        let filter = Filter::new()
            .address(self.contract.address())
            .from_block(from)
            .to_block(to);
        let logs = self
            .client
            .execute("eth_getLogs", || {
                let provider = Arc::clone(&provider);
                let filter = filter.clone();
                async move { Ok::<_, SyncError>(provider.get_logs(&filter).await?) }
            })
            .await?;

        let mut records = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_log(&self.abi, log) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Skipping undecodable log"),
            }
        }
        debug!(count = records.len(), "Fetched contract events");
        Ok(records)
    }
}
