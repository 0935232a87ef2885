use alloy::primitives::Address;

pub(crate) mod common;
pub mod pool_client;
pub mod smoothing_pool;

pub use pool_client::{PoolClient, RootSubmitter};
pub use smoothing_pool::{SmoothingPool, SmoothingPoolClient};

/// Where the smoothing pool lives and how to reach it.
#[derive(Clone, Debug)]
pub struct ContractConfig {
    pub rpc_url: String,
    pub pool_address: Address,
    pub max_ws_retries: u32,
    /// Fixed gas limit for transactions, estimated when unset.
    pub gas_limit: Option<u64>,
}

impl ContractConfig {
    pub fn new(rpc_url: String, pool_address: Address) -> Self {
        Self {
            rpc_url,
            pool_address,
            max_ws_retries: u32::MAX,
            gas_limit: None,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: Option<u64>) -> Self {
        self.gas_limit = gas_limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let pool = "0xAdFb8D27671F14f297eE94135e266aAFf8752e35"
            .parse::<Address>()
            .unwrap();
        let config = ContractConfig::new("http://localhost:8545".to_string(), pool)
            .with_gas_limit(Some(200_000));

        assert_eq!(config.pool_address, pool);
        assert_eq!(config.rpc_url, "http://localhost:8545");
        assert_eq!(config.max_ws_retries, u32::MAX);
        assert_eq!(config.gas_limit, Some(200_000));
    }
}
