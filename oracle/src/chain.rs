use alloy::primitives::{Address, B256};
use alloy::providers::DynProvider;
use async_trait::async_trait;
use oracle_core::ChainDataProvider;
use oracle_core::provider::{ExecutionHeader, ExecutionReceipt, ProposedBlock, ValidatorIdentity};
use oracle_core::types::{SubscriptionEvent, UnsubscriptionEvent};
use smoothing_pool_clients::SmoothingPoolClient;
use tokio_util::sync::CancellationToken;

use crate::beacon::BeaconClient;
use crate::execution::ExecutionClient;
use crate::retry::{RetryConfig, retry};

/// Live chain data for the orchestrator.
///
/// Every read is retried until it succeeds, so an error only comes back once
/// shutdown was requested.
pub struct ChainProvider {
    beacon: BeaconClient,
    execution: ExecutionClient,
    pool: SmoothingPoolClient<DynProvider>,
    retry: RetryConfig,
    shutdown: CancellationToken,
}

impl ChainProvider {
    pub fn new(
        beacon: BeaconClient,
        execution: ExecutionClient,
        pool: SmoothingPoolClient<DynProvider>,
        retry: RetryConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            beacon,
            execution,
            pool,
            retry,
            shutdown,
        }
    }
}

#[async_trait]
impl ChainDataProvider for ChainProvider {
    async fn get_finalized_slot(&self) -> anyhow::Result<u64> {
        retry(&self.retry, &self.shutdown, "finalized_slot", || {
            self.beacon.finalized_slot()
        })
        .await
    }

    async fn get_block_at_slot(&self, slot: u64) -> anyhow::Result<Option<ProposedBlock>> {
        retry(&self.retry, &self.shutdown, "block_at_slot", || async move {
            let Some(block) = self.beacon.block(slot).await? else {
                return Ok::<_, anyhow::Error>(None);
            };
            let transactions = self
                .execution
                .transactions(block.block_number, block.block_hash)
                .await?;
            Ok(Some(ProposedBlock {
                slot: block.slot,
                proposer_index: block.proposer_index,
                block_number: block.block_number,
                fee_recipient: block.fee_recipient,
                transactions,
            }))
        })
        .await
    }

    async fn get_proposal_duty(&self, slot: u64) -> anyhow::Result<u64> {
        retry(&self.retry, &self.shutdown, "proposal_duty", || {
            self.beacon.proposer(slot)
        })
        .await
    }

    async fn get_exec_header_and_receipts(
        &self,
        block_number: u64,
        tx_hashes: &[B256],
    ) -> anyhow::Result<(ExecutionHeader, Vec<ExecutionReceipt>)> {
        retry(&self.retry, &self.shutdown, "header_and_receipts", || async move {
            let header = self.execution.header(block_number).await?;
            let receipts = self.execution.receipts(tx_hashes).await?;
            Ok::<_, anyhow::Error>((header, receipts))
        })
        .await
    }

    async fn get_subscription_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> anyhow::Result<Vec<SubscriptionEvent>> {
        retry(&self.retry, &self.shutdown, "subscription_events", || {
            self.pool.subscription_events(from_block, to_block)
        })
        .await
    }

    async fn get_unsubscription_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> anyhow::Result<Vec<UnsubscriptionEvent>> {
        retry(&self.retry, &self.shutdown, "unsubscription_events", || {
            self.pool.unsubscription_events(from_block, to_block)
        })
        .await
    }

    async fn is_address_whitelisted(&self, block: u64, address: Address) -> anyhow::Result<bool> {
        retry(&self.retry, &self.shutdown, "is_oracle_member", || {
            self.pool.is_oracle_member(address, block)
        })
        .await
    }

    async fn get_validator(
        &self,
        index: u64,
        slot: u64,
    ) -> anyhow::Result<Option<ValidatorIdentity>> {
        retry(&self.retry, &self.shutdown, "validator", || {
            self.beacon.validator(index, slot)
        })
        .await
    }
}
