use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::OracleConfig;
use crate::error::{OracleError, OracleResult};
use crate::state_machine::next_status;
use crate::types::{
    BlockRecord, Donation, EligibilityPolicy, SubscriptionEvent, UnsubscriptionEvent,
    ValidatorEvent, ValidatorInfo, ValidatorPubkey, ValidatorStatus,
};

/// The reward ledger. Owned by the orchestrator, mutated one slot at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleState {
    pub validators: BTreeMap<u64, ValidatorInfo>,
    pub pool_accumulated_fees: U256,
    pub pool_fee_percent: u64,
    pub pool_fee_address: Address,
    pub eligibility: EligibilityPolicy,
    pub latest_processed_slot: Option<u64>,
    pub latest_processed_block: Option<u64>,
    pub subscriptions: Vec<SubscriptionEvent>,
    pub unsubscriptions: Vec<UnsubscriptionEvent>,
    pub donations: Vec<Donation>,
    pub pool_blocks: Vec<BlockRecord>,
}

/// Result of one call to [`OracleState::increase_all_pending_rewards`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Distribution {
    pub eligible: usize,
    pub per_validator: U256,
    /// Fee skim plus the division remainder.
    pub pool_fee_increase: U256,
}

impl OracleState {
    pub fn new(config: &OracleConfig) -> Self {
        Self {
            validators: BTreeMap::new(),
            pool_accumulated_fees: U256::ZERO,
            pool_fee_percent: config.pool_fee_percent,
            pool_fee_address: config.pool_fee_address,
            eligibility: config.eligibility,
            latest_processed_slot: None,
            latest_processed_block: None,
            subscriptions: Vec::new(),
            unsubscriptions: Vec::new(),
            donations: Vec::new(),
            pool_blocks: Vec::new(),
        }
    }

    /// Status of `index`, `Untracked` when the oracle never saw it subscribe.
    pub fn status_of(&self, index: u64) -> ValidatorStatus {
        self.validators
            .get(&index)
            .map(|v| v.status)
            .unwrap_or(ValidatorStatus::Untracked)
    }

    pub fn validator(&self, index: u64) -> OracleResult<&ValidatorInfo> {
        self.validators
            .get(&index)
            .ok_or(OracleError::UnknownValidator(index))
    }

    pub fn validator_mut(&mut self, index: u64) -> OracleResult<&mut ValidatorInfo> {
        self.validators
            .get_mut(&index)
            .ok_or(OracleError::UnknownValidator(index))
    }

    /// Start tracking `index` in `Untracked` status. Existing entries are kept.
    pub fn track_validator(
        &mut self,
        index: u64,
        withdrawal_address: Address,
        pubkey: ValidatorPubkey,
    ) -> &mut ValidatorInfo {
        self.validators
            .entry(index)
            .or_insert_with(|| ValidatorInfo::new(withdrawal_address, pubkey))
    }

    /// Apply `event` to validator `index` and return its new status.
    pub fn advance_state_machine(
        &mut self,
        index: u64,
        event: ValidatorEvent,
    ) -> OracleResult<ValidatorStatus> {
        let validator = self.validator_mut(index)?;
        let status = validator.status;
        let next = next_status(status, event).ok_or(OracleError::InvalidTransition {
            index,
            status,
            event,
        })?;
        debug!(
            validator_index = index,
            from = %status,
            to = %next,
            event = %event,
            "Validator transition"
        );
        validator.status = next;
        Ok(next)
    }

    /// Split `total` between the pool fee and every eligible validator.
    ///
    /// With no eligible validator the whole amount goes to the pool fee.
    pub fn increase_all_pending_rewards(&mut self, total: U256) -> Distribution {
        let fee = total * U256::from(self.pool_fee_percent) / U256::from(100u64);
        let remaining = total - fee;

        let policy = self.eligibility;
        let eligible: Vec<u64> = self
            .validators
            .iter()
            .filter(|(_, v)| policy.is_eligible(v.status))
            .map(|(index, _)| *index)
            .collect();

        if eligible.is_empty() {
            self.pool_accumulated_fees += total;
            return Distribution {
                eligible: 0,
                per_validator: U256::ZERO,
                pool_fee_increase: total,
            };
        }

        let count = U256::from(eligible.len());
        let per_validator = remaining / count;
        let remainder = remaining - per_validator * count;

        for index in &eligible {
            if let Some(validator) = self.validators.get_mut(index) {
                validator.pending_rewards += per_validator;
            }
        }
        self.pool_accumulated_fees += fee + remainder;

        Distribution {
            eligible: eligible.len(),
            per_validator,
            pool_fee_increase: fee + remainder,
        }
    }

    /// Move the pending balance of `index` into its claimable balance.
    pub fn consolidate_balance(&mut self, index: u64) -> OracleResult<()> {
        let validator = self.validator_mut(index)?;
        let pending = std::mem::take(&mut validator.pending_rewards);
        validator.accumulated_rewards += pending;
        Ok(())
    }

    /// Take away the pending balance of `index` and share it with the pool.
    pub fn redistribute_pending(&mut self, index: u64) -> OracleResult<Distribution> {
        let validator = self.validator_mut(index)?;
        let pending = std::mem::take(&mut validator.pending_rewards);
        Ok(self.increase_all_pending_rewards(pending))
    }

    pub fn count_by_status(&self) -> BTreeMap<&'static str, u64> {
        let mut counts: BTreeMap<&'static str, u64> = ValidatorStatus::ALL
            .iter()
            .map(|status| (status.as_str(), 0))
            .collect();
        for validator in self.validators.values() {
            *counts.entry(validator.status.as_str()).or_default() += 1;
        }
        counts
    }

    pub fn total_pending(&self) -> U256 {
        self.validators
            .values()
            .fold(U256::ZERO, |acc, v| acc + v.pending_rewards)
    }

    pub fn total_accumulated(&self) -> U256 {
        self.validators
            .values()
            .fold(U256::ZERO, |acc, v| acc + v.accumulated_rewards)
    }
}
