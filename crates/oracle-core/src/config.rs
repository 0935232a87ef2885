use alloy::primitives::{Address, U256};
use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::types::EligibilityPolicy;

/// Seconds per beacon chain slot.
pub const SECONDS_PER_SLOT: u64 = 12;
/// Slots per beacon chain epoch.
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Deployment parameters shared by every oracle instance of one pool.
///
/// Two instances only agree on a root if all of these match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Smoothing pool contract, also the fee recipient validators must use.
    pub pool_address: Address,
    /// First slot the oracle reconciles.
    pub deployed_slot: u64,
    /// Execution block of the contract deployment, used for event queries.
    pub deployed_block: u64,
    /// Number of slots between two merkle roots.
    pub checkpoint_size: u64,
    /// Percentage of every reward kept by the pool, 0..=100.
    pub pool_fee_percent: u64,
    pub pool_fee_address: Address,
    /// Collateral a manual subscription has to carry.
    pub collateral: U256,
    pub eligibility: EligibilityPolicy,
}

impl OracleConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.pool_fee_percent <= 100,
            "pool fee percent must be at most 100, got {}",
            self.pool_fee_percent
        );
        ensure!(self.checkpoint_size > 0, "checkpoint size must be positive");
        ensure!(
            self.pool_address != Address::ZERO,
            "pool address must not be the zero address"
        );
        ensure!(
            self.pool_fee_address != Address::ZERO,
            "pool fee address must not be the zero address"
        );
        Ok(())
    }

    /// Whether a merkle root has to be built once `slot` is processed.
    pub fn is_checkpoint_slot(&self, slot: u64) -> bool {
        slot > self.deployed_slot && (slot - self.deployed_slot) % self.checkpoint_size == 0
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> OracleConfig {
    OracleConfig {
        pool_address: Address::repeat_byte(0xaa),
        deployed_slot: 100,
        deployed_block: 1_000,
        checkpoint_size: 10,
        pool_fee_percent: 0,
        pool_fee_address: Address::repeat_byte(0xfe),
        collateral: U256::from(1_000u64),
        eligibility: EligibilityPolicy::ActiveOnly,
    }
}
