use alloy::{
    consensus::{Transaction, Typed2718},
    eips::BlockNumberOrTag,
    network::TransactionResponse,
    primitives::B256,
    providers::{DynProvider, Provider},
    rpc::types::Block,
};
use anyhow::{Context, Result, bail};
use futures_util::{StreamExt, TryStreamExt, stream};
use oracle_core::provider::{ExecutionHeader, ExecutionReceipt, ExecutionTx};

/// Execution layer reads needed to classify a block.
#[derive(Clone)]
pub struct ExecutionClient {
    provider: DynProvider,
    receipt_concurrency: usize,
}

impl ExecutionClient {
    pub fn new(provider: DynProvider, receipt_concurrency: usize) -> Self {
        Self {
            provider,
            receipt_concurrency: receipt_concurrency.max(1),
        }
    }

    async fn block(&self, number: u64, full: bool) -> Result<Block> {
        let request = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number));
        let block = if full {
            request.full().await?
        } else {
            request.await?
        };
        block.with_context(|| format!("execution block {number} not found"))
    }

    /// Transactions of block `number`, checked against the hash the beacon
    /// chain committed to.
    pub async fn transactions(&self, number: u64, expected_hash: B256) -> Result<Vec<ExecutionTx>> {
        let block = self.block(number, true).await?;
        if block.header.hash != expected_hash {
            bail!(
                "execution block {number} has hash {} \
                 but the beacon block references {expected_hash}",
                block.header.hash
            );
        }
        let txs = block
            .transactions
            .as_transactions()
            .with_context(|| format!("execution block {number} returned without transactions"))?;

        Ok(txs
            .iter()
            .map(|tx| ExecutionTx {
                hash: tx.tx_hash(),
                tx_type: tx.ty(),
                from: tx.from(),
                to: tx.to(),
                value: tx.value(),
                gas_price: Transaction::gas_price(tx),
                max_fee_per_gas: Transaction::max_fee_per_gas(tx),
                max_priority_fee_per_gas: tx.max_priority_fee_per_gas(),
            })
            .collect())
    }

    pub async fn header(&self, number: u64) -> Result<ExecutionHeader> {
        let block = self.block(number, false).await?;
        Ok(ExecutionHeader {
            number: block.header.number,
            base_fee_per_gas: block.header.base_fee_per_gas,
            gas_used: block.header.gas_used,
        })
    }

    /// One receipt per hash, in the order of `tx_hashes`.
    pub async fn receipts(&self, tx_hashes: &[B256]) -> Result<Vec<ExecutionReceipt>> {
        stream::iter(tx_hashes.iter().copied())
            .map(|hash| async move {
                let receipt = self
                    .provider
                    .get_transaction_receipt(hash)
                    .await?
                    .with_context(|| format!("receipt of {hash} not found"))?;
                Ok::<_, anyhow::Error>(ExecutionReceipt {
                    tx_hash: receipt.transaction_hash,
                    gas_used: receipt.gas_used,
                })
            })
            .buffered(self.receipt_concurrency)
            .try_collect()
            .await
    }
}
