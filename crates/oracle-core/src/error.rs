use crate::types::{ValidatorEvent, ValidatorStatus};

/// Errors raised while reconciling a slot.
///
/// Transient I/O never reaches this type as a normal condition: the chain data
/// provider retries on its own and only gives up when shutdown is requested, in
/// which case the failure surfaces as [`OracleError::Provider`].
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("validator {index} in status {status} cannot handle event {event}")]
    InvalidTransition {
        index: u64,
        status: ValidatorStatus,
        event: ValidatorEvent,
    },

    #[error("validator {0} is not tracked by the oracle")]
    UnknownValidator(u64),

    #[error("block {block_number} has {transactions} transactions but {receipts} receipts")]
    ReceiptCountMismatch {
        block_number: u64,
        transactions: usize,
        receipts: usize,
    },

    #[error(
        "block {block_number}: receipt {receipt_hash} does not belong to transaction {tx_hash}"
    )]
    ReceiptOrderMismatch {
        block_number: u64,
        tx_hash: alloy::primitives::B256,
        receipt_hash: alloy::primitives::B256,
    },

    #[error("block {0} has no base fee, cannot reconstruct the proposer tip")]
    MissingBaseFee(u64),

    #[error("block {block_number}: burned fees {burned} exceed collected fees {collected}")]
    NegativeTip {
        block_number: u64,
        collected: alloy::primitives::U256,
        burned: alloy::primitives::U256,
    },

    #[error("transaction {hash} has unsupported type {tx_type}")]
    UnsupportedTransactionType {
        hash: alloy::primitives::B256,
        tx_type: u8,
    },

    #[error("slot {slot}: block proposed by {block_proposer} but duty belongs to {duty}")]
    ProposerMismatch {
        slot: u64,
        duty: u64,
        block_proposer: u64,
    },

    #[error("slot {got} processed out of order, expected {expected}")]
    SlotOutOfOrder { expected: u64, got: u64 },

    #[error("chain data provider failed: {0}")]
    Provider(#[source] anyhow::Error),

    #[error("merkle root submission failed: {0}")]
    Submission(#[source] anyhow::Error),
}

impl OracleError {
    /// True when the error means the ledger can no longer be trusted to match
    /// other oracle instances, so slot advancement must stop.
    pub fn is_invariant_violation(&self) -> bool {
        !matches!(self, OracleError::Provider(_) | OracleError::Submission(_))
    }
}

pub type OracleResult<T> = Result<T, OracleError>;
