use alloy::{
    contract::CallBuilder, primitives::B256, providers::Provider, rpc::types::TransactionReceipt,
    sol_types::SolInterface,
};
use anyhow::{Result, anyhow};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Sends contract calls one at a time, simulating them first so reverts come
/// back with a decoded reason instead of a bare failed receipt.
#[derive(Clone)]
pub(crate) struct TransactionSubmitter<S> {
    tx_lock: Arc<Mutex<()>>,
    gas_limit: Option<u64>,
    _decoder: PhantomData<S>,
}

impl<S: SolInterface + Debug + Clone> TransactionSubmitter<S> {
    pub(crate) fn new(tx_lock: Arc<Mutex<()>>) -> Self {
        Self {
            tx_lock,
            gas_limit: None,
            _decoder: PhantomData,
        }
    }

    pub(crate) fn with_gas_limit(mut self, gas_limit: Option<u64>) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub(crate) async fn invoke<P, D>(&self, method: &str, call: CallBuilder<P, D>) -> Result<B256>
    where
        P: Provider + Clone,
        D: alloy::contract::CallDecoder + Clone,
    {
        if let Err(e) = call.call().await {
            let e = self.decode_error(e);
            return Err(anyhow!("{method} reverted: {e}"));
        }

        let call = match self.gas_limit {
            Some(gas) => call.gas(gas),
            None => call,
        };

        let provider = call.provider.clone();
        let estimate = provider.estimate_eip1559_fees().await?;
        let call = call
            .max_priority_fee_per_gas(estimate.max_priority_fee_per_gas)
            .max_fee_per_gas(estimate.max_fee_per_gas);

        let _guard = self.tx_lock.lock().await;
        let pending = call.send().await.map_err(|e| {
            let e = self.decode_error(e);
            anyhow!("{method} failed to send: {e}")
        })?;

        let receipt = pending.get_receipt().await?;
        let tx_hash = receipt.transaction_hash;
        Self::log_fee_details(method, &receipt, estimate.max_fee_per_gas);

        if !receipt.status() {
            if let Some(limit) = self.gas_limit {
                let used = receipt.gas_used;
                if used >= limit {
                    return Err(anyhow!(
                        "{method} ran out of gas (used {used} of {limit} limit). Tx: {tx_hash:?}"
                    ));
                }
            }
            return Err(anyhow!("{method} reverted on-chain. Tx hash: {tx_hash:?}"));
        }

        Ok(tx_hash)
    }

    fn decode_error(&self, error: alloy::contract::Error) -> String {
        match error.try_decode_into_interface_error::<S>() {
            Ok(error) => format!("{error:?}"),
            Err(error) => super::errors::decode_any_error(&error),
        }
    }

    fn log_fee_details(method: &str, receipt: &TransactionReceipt, max_fee_per_gas: u128) {
        let total_cost = receipt.effective_gas_price * receipt.gas_used as u128;
        if receipt.effective_gas_price >= max_fee_per_gas {
            warn!(
                method = %method,
                tx_hash = ?receipt.transaction_hash,
                block_number = ?receipt.block_number,
                effective_gas_price = receipt.effective_gas_price,
                gas_used = receipt.gas_used,
                total_cost,
                max_fee_per_gas,
                "Transaction paid its full fee cap"
            );
        } else {
            info!(
                method = %method,
                tx_hash = ?receipt.transaction_hash,
                block_number = ?receipt.block_number,
                effective_gas_price = receipt.effective_gas_price,
                gas_used = receipt.gas_used,
                total_cost,
                "Transaction mined"
            );
        }
    }
}
