use crate::{ContractConfig, SmoothingPoolClient};
use alloy::{
    network::{Ethereum, EthereumWallet, NetworkWallet},
    primitives::{Address, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder, WsConnect},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use oracle_core::ContractSubmitter;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared WebSocket provider plus the pool contract client.
///
/// Without a private key the client is read-only and no root is ever sent.
#[derive(Clone)]
pub struct PoolClient {
    provider: DynProvider,
    wallet: Option<EthereumWallet>,
    pub pool: SmoothingPoolClient<DynProvider>,
}

impl PoolClient {
    pub async fn new(config: ContractConfig, private_key: Option<String>) -> anyhow::Result<Self> {
        let ws_url = config
            .rpc_url
            .replace("http://", "ws://")
            .replace("https://", "wss://");
        let ws = WsConnect::new(ws_url).with_max_retries(config.max_ws_retries);

        let (provider, wallet) = match private_key {
            Some(key) => {
                let signer: PrivateKeySigner = key.parse::<PrivateKeySigner>()?;
                let wallet = EthereumWallet::from(signer);
                let provider: DynProvider = ProviderBuilder::new()
                    .wallet(wallet.clone())
                    .with_simple_nonce_management()
                    .with_gas_estimation()
                    .connect_ws(ws)
                    .await?
                    .erased();
                (provider, Some(wallet))
            }
            None => {
                let provider: DynProvider = ProviderBuilder::new().connect_ws(ws).await?.erased();
                (provider, None)
            }
        };

        let tx_lock = Arc::new(Mutex::new(()));
        let pool = SmoothingPoolClient::new(provider.clone(), config, tx_lock);
        Ok(Self {
            provider,
            wallet,
            pool,
        })
    }

    pub fn provider(&self) -> DynProvider {
        self.provider.clone()
    }

    /// Address transactions are signed with, `None` in dry run.
    pub fn signer_address(&self) -> Option<Address> {
        self.wallet
            .as_ref()
            .map(<EthereumWallet as NetworkWallet<Ethereum>>::default_signer_address)
    }

    pub async fn get_balance(&self) -> anyhow::Result<Option<U256>> {
        match self.signer_address() {
            Some(address) => Ok(Some(self.provider.get_balance(address).await?)),
            None => Ok(None),
        }
    }

    /// Root submitter, only available when a private key was configured.
    pub fn root_submitter(&self) -> Option<RootSubmitter> {
        self.signer_address().map(|address| RootSubmitter {
            pool: self.pool.clone(),
            address,
        })
    }
}

/// Sends `updateRewardsRoot` from the oracle's own key.
#[derive(Clone)]
pub struct RootSubmitter {
    pool: SmoothingPoolClient<DynProvider>,
    address: Address,
}

#[async_trait]
impl ContractSubmitter for RootSubmitter {
    fn submitter_address(&self) -> Address {
        self.address
    }

    async fn submit_merkle_root(&self, root: B256) -> anyhow::Result<B256> {
        self.pool.update_rewards_root(root).await
    }
}
