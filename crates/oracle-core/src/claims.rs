use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::checkpoint::OnchainState;
use crate::provider::ClaimedBalanceReader;

/// What a withdrawal address can claim against a committed root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimInfo {
    pub withdrawal_address: Address,
    pub merkle_root: B256,
    pub checkpoint_slot: u64,
    /// Lifetime balance committed in the leaf.
    pub accumulated_balance: U256,
    /// Already withdrawn through the pool contract.
    pub claimed_balance: U256,
    pub claimable: U256,
    pub proof: Vec<B256>,
}

/// Look up `address` in `checkpoint` and subtract what the contract already
/// paid out. Returns `None` when the address has no leaf.
pub async fn query_claim<R>(
    checkpoint: &OnchainState,
    address: Address,
    reader: &R,
) -> anyhow::Result<Option<ClaimInfo>>
where
    R: ClaimedBalanceReader + ?Sized,
{
    let Some(leaf) = checkpoint.leaves.get(&address) else {
        return Ok(None);
    };
    let proof = checkpoint.proofs.get(&address).cloned().unwrap_or_default();
    let claimed_balance = reader.claimed_balance(address).await?;

    Ok(Some(ClaimInfo {
        withdrawal_address: address,
        merkle_root: checkpoint.merkle_root,
        checkpoint_slot: checkpoint.slot,
        accumulated_balance: leaf.accumulated_balance,
        claimed_balance,
        claimable: leaf.accumulated_balance.saturating_sub(claimed_balance),
        proof,
    }))
}
