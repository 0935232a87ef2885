use crate::{ContractConfig, common::tx_submitter::TransactionSubmitter};
use alloy::{
    eips::BlockId,
    primitives::{Address, B256, U256},
    providers::{DynProvider, Provider},
    rpc::types::Log,
    sol,
    sol_types::SolEvent,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use oracle_core::ClaimedBalanceReader;
use oracle_core::types::{SubscriptionEvent, UnsubscriptionEvent};
use std::sync::Arc;
use tokio::sync::Mutex;

sol!(
    #[sol(rpc)]
    #[derive(Debug)]
    contract SmoothingPool {
        error NotOracleMember();
        error InvalidProof();
        error InvalidCollateral();
        error NothingToClaim();

        event SubscribeValidator(
            address sender,
            uint256 subscriptionCollateral,
            uint64 validatorID
        );
        event UnsubscribeValidator(address sender, uint64 validatorID);
        event UpdateRewardsRoot(bytes32 newRewardsRoot);
        event ClaimRewards(
            address withdrawalAddress,
            address rewardAddress,
            uint256 claimableBalance
        );

        function rewardsRoot() external view returns (bytes32);
        function claimedBalance(address withdrawalAddress) external view returns (uint256);
        function subscriptionCollateral() external view returns (uint256);
        function oracleMembers(address member) external view returns (bool);
        function updateRewardsRoot(bytes32 newRewardsRoot) external;
    }
);

use SmoothingPool::SmoothingPoolInstance;

/// Client for the smoothing pool contract.
#[derive(Clone)]
pub struct SmoothingPoolClient<P: Provider + Clone> {
    contract: SmoothingPoolInstance<P>,
    submitter: TransactionSubmitter<SmoothingPool::SmoothingPoolErrors>,
}

impl<P: Provider + Clone> SmoothingPoolClient<P> {
    pub fn new(provider: P, config: ContractConfig, tx_lock: Arc<Mutex<()>>) -> Self {
        let contract = SmoothingPoolInstance::new(config.pool_address, provider);
        let submitter = TransactionSubmitter::new(tx_lock).with_gas_limit(config.gas_limit);
        Self {
            contract,
            submitter,
        }
    }

    pub fn address(&self) -> Address {
        *self.contract.address()
    }

    // ------------------------------------------------------------------------
    // View Functions
    // ------------------------------------------------------------------------

    /// Root currently committed on-chain.
    pub async fn rewards_root(&self) -> Result<B256> {
        Ok(self.contract.rewardsRoot().call().await?)
    }

    /// Amount `address` already withdrew.
    pub async fn claimed_balance(&self, address: Address) -> Result<U256> {
        Ok(self.contract.claimedBalance(address).call().await?)
    }

    /// Collateral the contract requires per subscribed validator.
    pub async fn subscription_collateral(&self) -> Result<U256> {
        Ok(self.contract.subscriptionCollateral().call().await?)
    }

    /// Whether `member` may update the root, as of `block`.
    pub async fn is_oracle_member(&self, member: Address, block: u64) -> Result<bool> {
        Ok(self
            .contract
            .oracleMembers(member)
            .block(BlockId::number(block))
            .call()
            .await?)
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    pub async fn update_rewards_root(&self, root: B256) -> Result<B256> {
        let call = self.contract.updateRewardsRoot(root);
        self.submitter.invoke("updateRewardsRoot", call).await
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    pub async fn subscription_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<SubscriptionEvent>> {
        let events = self
            .query_events::<SmoothingPool::SubscribeValidator>(from_block, to_block)
            .await?;
        events
            .into_iter()
            .map(|(event, log)| {
                let position = LogPosition::from_log(&log)?;
                Ok(SubscriptionEvent {
                    validator_index: event.validatorID,
                    sender: event.sender,
                    collateral: event.subscriptionCollateral,
                    block_number: position.block_number,
                    log_index: position.log_index,
                    tx_hash: position.tx_hash,
                })
            })
            .collect()
    }

    pub async fn unsubscription_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<UnsubscriptionEvent>> {
        let events = self
            .query_events::<SmoothingPool::UnsubscribeValidator>(from_block, to_block)
            .await?;
        events
            .into_iter()
            .map(|(event, log)| {
                let position = LogPosition::from_log(&log)?;
                Ok(UnsubscriptionEvent {
                    validator_index: event.validatorID,
                    sender: event.sender,
                    block_number: position.block_number,
                    log_index: position.log_index,
                    tx_hash: position.tx_hash,
                })
            })
            .collect()
    }

    /// Events of type `E` in `[from_block, to_block]`, in chain order.
    async fn query_events<E: SolEvent>(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<(E, Log)>> {
        let mut events = self
            .contract
            .event_filter::<E>()
            .from_block(from_block)
            .to_block(to_block)
            .query()
            .await
            .with_context(|| format!("Failed to query {} events", E::SIGNATURE))?;
        events.sort_by_key(|(_, log)| (log.block_number, log.log_index));
        Ok(events)
    }
}

#[async_trait]
impl ClaimedBalanceReader for SmoothingPoolClient<DynProvider> {
    async fn claimed_balance(&self, address: Address) -> Result<U256> {
        Ok(self.contract.claimedBalance(address).call().await?)
    }
}

/// Where a log sits in the chain. Only mined logs are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LogPosition {
    block_number: u64,
    log_index: u64,
    tx_hash: B256,
}

impl LogPosition {
    fn from_log(log: &Log) -> Result<Self> {
        Ok(Self {
            block_number: log.block_number.context("log without block number")?,
            log_index: log.log_index.context("log without log index")?,
            tx_hash: log.transaction_hash.context("log without transaction hash")?,
        })
    }
}
