use alloy::primitives::Address;
use anyhow::{Context, Result};
use checkpoint_store::CheckpointStore;
use oracle_core::query_claim;
use smoothing_pool_clients::{ContractConfig, PoolClient};
use tracing::{info, warn};

use crate::args::ChainArgs;

/// Print the claim of `address` against the latest stored checkpoint.
pub async fn run(chain: ChainArgs, address: Address) -> Result<()> {
    let store = CheckpointStore::open(&chain.state_dir)?;
    let checkpoint = store.latest_checkpoint()?.with_context(|| {
        format!(
            "No checkpoint stored in {}, run the oracle first",
            chain.state_dir.display()
        )
    })?;

    let client = PoolClient::new(
        ContractConfig::new(chain.execution_url, chain.pool_address),
        None,
    )
    .await?;

    let onchain_root = client.pool.rewards_root().await?;
    if onchain_root != checkpoint.merkle_root {
        warn!(
            local_root = ?checkpoint.merkle_root,
            onchain_root = ?onchain_root,
            "Latest local checkpoint is not the root committed on-chain, the proof will not verify"
        );
    }

    let Some(claim) = query_claim(&checkpoint, address, &client.pool).await? else {
        info!(
            address = %address,
            slot = checkpoint.slot,
            "Address has no leaf in the latest checkpoint"
        );
        return Ok(());
    };
    if !checkpoint.verify(address) {
        warn!(address = %address, "Stored proof does not verify against the stored root");
    }

    println!("{}", serde_json::to_string_pretty(&claim)?);
    Ok(())
}
