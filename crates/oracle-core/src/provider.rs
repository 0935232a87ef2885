//! Boundaries between the reconciliation core and the outside world.
//!
//! The chain data provider is expected to retry transient RPC failures on its
//! own. An `Err` from any of these calls means the provider gave up for good
//! (shutdown requested), not that the caller should try again.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{SubscriptionEvent, UnsubscriptionEvent, ValidatorPubkey};

/// EIP-2718 transaction type, as far as fee accounting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTxType {
    Legacy,
    AccessList,
    Eip1559,
    Eip4844,
    Eip7702,
}

impl ExecutionTxType {
    pub fn from_type_byte(ty: u8) -> Option<Self> {
        match ty {
            0 => Some(ExecutionTxType::Legacy),
            1 => Some(ExecutionTxType::AccessList),
            2 => Some(ExecutionTxType::Eip1559),
            3 => Some(ExecutionTxType::Eip4844),
            4 => Some(ExecutionTxType::Eip7702),
            _ => None,
        }
    }

    /// Whether the price is a flat gas price rather than a fee cap + tip cap.
    pub fn has_flat_gas_price(self) -> bool {
        matches!(self, ExecutionTxType::Legacy | ExecutionTxType::AccessList)
    }
}

/// A decoded execution layer transaction with the fields fee accounting needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTx {
    pub hash: B256,
    pub tx_type: u8,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    /// Flat gas price of legacy and access-list transactions.
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: Option<u128>,
}

/// A proposed beacon block together with its execution payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedBlock {
    pub slot: u64,
    pub proposer_index: u64,
    pub block_number: u64,
    pub fee_recipient: Address,
    pub transactions: Vec<ExecutionTx>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHeader {
    pub number: u64,
    pub base_fee_per_gas: Option<u64>,
    pub gas_used: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub tx_hash: B256,
    pub gas_used: u64,
}

/// Beacon chain identity of a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorIdentity {
    pub index: u64,
    pub pubkey: ValidatorPubkey,
    /// Execution address from 0x01/0x02 withdrawal credentials, if any.
    pub withdrawal_address: Option<Address>,
}

/// Read access to the consensus and execution chains plus the pool contract.
#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    /// Latest finalized slot, the oracle never goes past it.
    async fn get_finalized_slot(&self) -> anyhow::Result<u64>;

    /// Block proposed at `slot`, `None` when the slot was missed.
    async fn get_block_at_slot(&self, slot: u64) -> anyhow::Result<Option<ProposedBlock>>;

    /// Index of the validator that had to propose at `slot`.
    async fn get_proposal_duty(&self, slot: u64) -> anyhow::Result<u64>;

    /// Header and one receipt per transaction, in transaction order.
    async fn get_exec_header_and_receipts(
        &self,
        block_number: u64,
        tx_hashes: &[B256],
    ) -> anyhow::Result<(ExecutionHeader, Vec<ExecutionReceipt>)>;

    /// Subscription events in `[from_block, to_block]`, ordered by block and log index.
    async fn get_subscription_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> anyhow::Result<Vec<SubscriptionEvent>>;

    /// Unsubscription events in `[from_block, to_block]`, ordered by block and log index.
    async fn get_unsubscription_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> anyhow::Result<Vec<UnsubscriptionEvent>>;

    /// Whether `address` may update the rewards root as of `block`.
    async fn is_address_whitelisted(&self, block: u64, address: Address) -> anyhow::Result<bool>;

    /// Validator `index` as of the beacon state at `slot`. Pinned to the slot
    /// so that replaying a slot always sees the same withdrawal credentials.
    async fn get_validator(
        &self,
        index: u64,
        slot: u64,
    ) -> anyhow::Result<Option<ValidatorIdentity>>;
}

/// Publishes merkle roots on-chain.
#[async_trait]
pub trait ContractSubmitter: Send + Sync {
    /// Address the root update is sent from.
    fn submitter_address(&self) -> Address;

    async fn submit_merkle_root(&self, root: B256) -> anyhow::Result<B256>;
}

/// On-chain read of what an address already claimed.
#[async_trait]
pub trait ClaimedBalanceReader: Send + Sync {
    async fn claimed_balance(&self, address: Address) -> anyhow::Result<U256>;
}
