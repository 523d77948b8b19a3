use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use ethers::types::Address;
use futures::stream::{self, StreamExt};
use tracing::{debug, instrument, warn};

use crate::contract::ChainContract;
use crate::error::SyncError;
use crate::types::{
    AddressSummary, ChainBlock, ContentDescriptor, ContractInfo, GovernanceParams, Proposal,
    SearchResult, Token,
};
use crate::utils::parse_address;

/// Indices of the newest `count` entities out of `total`, newest first.
pub fn window(total: u64, count: u64) -> impl Iterator<Item = u64> {
    (total.saturating_sub(count)..total).rev()
}

/// Batch reads of contract state into view-model records.
pub struct ChainReader {
    contract: Arc<dyn ChainContract>,
    concurrency: usize,
}

impl ChainReader {
    pub fn new(contract: Arc<dyn ChainContract>, concurrency: usize) -> Self {
        Self {
            contract,
            concurrency: concurrency.max(1),
        }
    }

    pub fn contract(&self) -> &Arc<dyn ChainContract> {
        &self.contract
    }

    /// Reads `indices` with bounded concurrency, keeping input order and
    /// dropping entries whose read failed.
    async fn read_each<T, F, Fut>(
        &self,
        entity: &'static str,
        indices: impl Iterator<Item = u64>,
        read: F,
    ) -> Vec<T>
    where
        F: Fn(u64) -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        stream::iter(indices)
            .map(|index| {
                let fut = read(index);
                async move { (index, fut.await) }
            })
            .buffered(self.concurrency)
            .filter_map(|(index, result)| async move {
                match result {
                    Ok(item) => Some(item),
                    Err(source) => {
                        let err = SyncError::PartialReadFailure {
                            entity,
                            index,
                            source: Box::new(source),
                        };
                        warn!(error = %err, "Skipping entity");
                        None
                    }
                }
            })
            .collect()
            .await
    }

    pub async fn block_count(&self) -> Result<u64, SyncError> {
        self.contract.block_count().await
    }

    pub async fn total_supply(&self) -> Result<u64, SyncError> {
        self.contract.total_supply().await
    }

    pub async fn proposal_count(&self) -> Result<u64, SyncError> {
        self.contract.proposal_count().await
    }

    #[instrument(skip(self))]
    pub async fn read_recent_blocks(&self, count: u64) -> Result<Vec<ChainBlock>, SyncError> {
        let total = self.block_count().await?;
        Ok(self.blocks_in_window(total, count).await)
    }

    #[instrument(skip(self))]
    pub async fn read_recent_tokens(&self, count: u64) -> Result<Vec<Token>, SyncError> {
        let total = self.total_supply().await?;
        Ok(self.tokens_in_window(total, count).await)
    }

    #[instrument(skip(self))]
    pub async fn read_recent_proposals(&self, count: u64) -> Result<Vec<Proposal>, SyncError> {
        let total = self.proposal_count().await?;
        Ok(self.proposals_in_window(total, count).await)
    }

    pub async fn blocks_in_window(&self, total: u64, count: u64) -> Vec<ChainBlock> {
        let contract = &self.contract;
        self.read_each("block", window(total, count), |i| contract.get_block(i))
            .await
    }

    pub async fn tokens_in_window(&self, total: u64, count: u64) -> Vec<Token> {
        self.read_each("token", window(total, count), |i| self.read_token(i))
            .await
    }

    pub async fn proposals_in_window(&self, total: u64, count: u64) -> Vec<Proposal> {
        let contract = &self.contract;
        self.read_each("proposal", window(total, count), |i| contract.proposal(i))
            .await
    }

    /// One token with its content descriptor and links.
    pub async fn read_token(&self, token_id: u64) -> Result<Token, SyncError> {
        let ((owner, metadata), prx) = tokio::try_join!(
            self.contract.get_token(token_id),
            self.contract.prx_metadata(token_id)
        )?;
        Ok(Token {
            id: token_id,
            owner,
            metadata,
            content: ContentDescriptor {
                uri: prx.content_uri,
                content_type: prx.content_type,
                is_private: prx.is_private,
            },
            creator: prx.creator,
            creation_block: prx.creation_block,
            linked: prx.linked_tokens.into_iter().collect(),
        })
    }

    pub async fn read_linked_content(&self, token_id: u64) -> Result<BTreeSet<u64>, SyncError> {
        Ok(self.contract.linked_content(token_id).await?.into_iter().collect())
    }

    /// Every token held by `owner`, ascending id.
    ///
    /// Asks `tokenOwner` for every id ever minted, so the cost grows with total
    /// supply. The contract has no owner index to do better.
    #[instrument(skip(self))]
    pub async fn read_tokens_owned_by(&self, owner: Address) -> Result<Vec<Token>, SyncError> {
        let supply = self.total_supply().await?;
        Ok(self.tokens_owned_by_in(supply, owner).await)
    }

    pub async fn tokens_owned_by_in(&self, supply: u64, owner: Address) -> Vec<Token> {
        let contract = &self.contract;
        let owned_ids: Vec<u64> = self
            .read_each("token owner", 0..supply, |i| async move {
                Ok::<_, SyncError>((i, contract.token_owner(i).await?))
            })
            .await
            .into_iter()
            .filter(|(_, token_owner)| *token_owner == owner)
            .map(|(id, _)| id)
            .collect();
        debug!(supply, owned = owned_ids.len(), "Ownership scan finished");

        self.read_each("token", owned_ids.into_iter(), |i| self.read_token(i))
            .await
    }

    pub async fn read_contract_info(&self) -> Result<ContractInfo, SyncError> {
        let (name, symbol, total_supply, block_count, mint_price) = tokio::try_join!(
            self.contract.name(),
            self.contract.symbol(),
            self.contract.total_supply(),
            self.contract.block_count(),
            self.contract.mint_price()
        )?;
        let chain_valid = match self.contract.verify_chain().await {
            Ok(valid) => Some(valid),
            Err(e) => {
                warn!(error = %e, "verifyChain failed");
                None
            }
        };
        Ok(ContractInfo {
            name,
            symbol,
            total_supply,
            block_count,
            mint_price,
            chain_valid,
        })
    }

    pub async fn read_governance_params(&self) -> Result<GovernanceParams, SyncError> {
        let (proposal_count, minimum_voting_period, minimum_votes_required, governance_threshold) =
            tokio::try_join!(
                self.contract.proposal_count(),
                self.contract.minimum_voting_period(),
                self.contract.minimum_votes_required(),
                self.contract.governance_threshold()
            )?;
        Ok(GovernanceParams {
            proposal_count,
            minimum_voting_period,
            minimum_votes_required,
            governance_threshold,
        })
    }

    /// Public content is always accessible; private content asks the contract.
    pub async fn can_access_content(&self, user: Address, token_id: u64) -> Result<bool, SyncError> {
        let prx = self.contract.prx_metadata(token_id).await?;
        if !prx.is_private {
            return Ok(true);
        }
        self.contract.can_access_content(user, token_id).await
    }

    /// Explorer lookup by index or address.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> Result<SearchResult, SyncError> {
        let query = query.trim();

        if let Ok(index) = query.parse::<u64>() {
            let (block_count, supply) =
                tokio::try_join!(self.contract.block_count(), self.contract.total_supply())?;

            let block = if index < block_count {
                self.contract
                    .get_block(index)
                    .await
                    .map_err(|e| warn!(index, error = %e, "Block lookup failed"))
                    .ok()
            } else {
                None
            };
            let token = if index < supply {
                self.read_token(index)
                    .await
                    .map_err(|e| warn!(index, error = %e, "Token lookup failed"))
                    .ok()
            } else {
                None
            };

            if block.is_none() && token.is_none() {
                return Ok(SearchResult::NotFound);
            }
            return Ok(SearchResult::Index { block, token });
        }

        if let Some(address) = parse_address(query) {
            let token_balance = self.contract.balance_of(address).await?;
            let tokens = self.read_tokens_owned_by(address).await?;
            return Ok(SearchResult::Address(AddressSummary {
                address,
                token_balance,
                tokens,
            }));
        }

        Ok(SearchResult::NotFound)
    }
}
