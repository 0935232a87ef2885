//! Decides how much of a block's proposer reward reached the pool.
//!
//! Two paths exist. MEV blocks pay the pool with a plain transfer from the
//! builder (the block's fee recipient), which is visible in the transaction
//! list. Vanilla blocks name the pool as fee recipient, so the reward is the sum
//! of priority fees and has to be rebuilt from receipts.

use alloy::primitives::{Address, U256};
use tracing::{debug, warn};

use crate::error::{OracleError, OracleResult};
use crate::provider::{
    ChainDataProvider, ExecutionHeader, ExecutionReceipt, ExecutionTx, ExecutionTxType,
    ProposedBlock,
};
use crate::types::{Donation, RewardType};

/// What a block sent to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReward {
    pub amount: U256,
    /// `Some` whenever the proposer paid the pool, even if `amount` is zero.
    /// `None` means the proposer used another fee recipient.
    pub reward_type: Option<RewardType>,
    pub donations: Vec<Donation>,
}

/// Transfers to the pool found in a block's transaction list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PoolTransfers {
    pub mev_total: U256,
    pub mev_matches: usize,
    pub donations: Vec<Donation>,
}

/// Split the transfers to `pool` into the builder payment and donations.
pub fn scan_pool_transfers(block: &ProposedBlock, pool: Address) -> PoolTransfers {
    let mut transfers = PoolTransfers::default();
    for tx in &block.transactions {
        if tx.to != Some(pool) {
            continue;
        }
        if tx.from == block.fee_recipient {
            transfers.mev_total += tx.value;
            transfers.mev_matches += 1;
        } else if tx.value > U256::ZERO {
            transfers.donations.push(Donation {
                sender: tx.from,
                amount: tx.value,
                block_number: block.block_number,
                tx_hash: tx.hash,
            });
        }
    }
    transfers
}

/// Price per gas unit the sender actually paid.
pub fn effective_gas_price(tx: &ExecutionTx, base_fee: u64) -> OracleResult<u128> {
    let unsupported = || OracleError::UnsupportedTransactionType {
        hash: tx.hash,
        tx_type: tx.tx_type,
    };
    let tx_type = ExecutionTxType::from_type_byte(tx.tx_type).ok_or_else(unsupported)?;

    if tx_type.has_flat_gas_price() {
        return Ok(tx.gas_price.unwrap_or(tx.max_fee_per_gas));
    }

    let tip_cap = tx.max_priority_fee_per_gas.ok_or_else(unsupported)?;
    let price = tip_cap.saturating_add(u128::from(base_fee));
    Ok(price.min(tx.max_fee_per_gas))
}

/// Priority fees earned by the fee recipient of a block: everything paid for
/// gas minus the burned base fee.
pub fn vanilla_tip(
    txs: &[ExecutionTx],
    header: &ExecutionHeader,
    receipts: &[ExecutionReceipt],
) -> OracleResult<U256> {
    if txs.len() != receipts.len() {
        return Err(OracleError::ReceiptCountMismatch {
            block_number: header.number,
            transactions: txs.len(),
            receipts: receipts.len(),
        });
    }
    let base_fee = header
        .base_fee_per_gas
        .ok_or(OracleError::MissingBaseFee(header.number))?;

    let mut collected = U256::ZERO;
    for (tx, receipt) in txs.iter().zip(receipts) {
        if tx.hash != receipt.tx_hash {
            return Err(OracleError::ReceiptOrderMismatch {
                block_number: header.number,
                tx_hash: tx.hash,
                receipt_hash: receipt.tx_hash,
            });
        }
        let price = effective_gas_price(tx, base_fee)?;
        collected += U256::from(price) * U256::from(receipt.gas_used);
    }

    let burned = U256::from(header.gas_used) * U256::from(base_fee);
    collected
        .checked_sub(burned)
        .ok_or(OracleError::NegativeTip {
            block_number: header.number,
            collected,
            burned,
        })
}

/// Classify the reward of `block` for `pool`. Receipts are only fetched when
/// the pool is the fee recipient.
pub async fn classify_block<P>(
    block: &ProposedBlock,
    pool: Address,
    provider: &P,
) -> OracleResult<BlockReward>
where
    P: ChainDataProvider + ?Sized,
{
    let transfers = scan_pool_transfers(block, pool);
    if transfers.mev_matches > 1 {
        warn!(
            slot = block.slot,
            block_number = block.block_number,
            matches = transfers.mev_matches,
            "More than one builder transfer to the pool in a single block"
        );
    }

    let pays_pool = block.fee_recipient == pool;
    let vanilla = if pays_pool && !block.transactions.is_empty() {
        let hashes: Vec<_> = block.transactions.iter().map(|tx| tx.hash).collect();
        let (header, receipts) = provider
            .get_exec_header_and_receipts(block.block_number, &hashes)
            .await
            .map_err(OracleError::Provider)?;
        vanilla_tip(&block.transactions, &header, &receipts)?
    } else {
        U256::ZERO
    };

    // Naming the pool as fee recipient is what counts as paying it, a block
    // with no priority fees still does.
    let (amount, reward_type) = if transfers.mev_total > U256::ZERO {
        if vanilla > U256::ZERO {
            warn!(
                slot = block.slot,
                block_number = block.block_number,
                mev = %transfers.mev_total,
                vanilla = %vanilla,
                "Block has both a builder transfer and a vanilla tip, using the transfer"
            );
        }
        (transfers.mev_total, Some(RewardType::Mev))
    } else if pays_pool {
        (vanilla, Some(RewardType::Vanilla))
    } else if transfers.mev_matches > 0 {
        (U256::ZERO, Some(RewardType::Mev))
    } else {
        (U256::ZERO, None)
    };

    debug!(
        slot = block.slot,
        block_number = block.block_number,
        reward = %amount,
        reward_type = ?reward_type,
        donations = transfers.donations.len(),
        "Classified block reward"
    );

    Ok(BlockReward {
        amount,
        reward_type,
        donations: transfers.donations,
    })
}
