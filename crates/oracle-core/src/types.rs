use alloy::primitives::{Address, B256, FixedBytes, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// BLS public key of a beacon chain validator.
pub type ValidatorPubkey = FixedBytes<48>;

/// Lifecycle status of a validator inside the smoothing pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStatus {
    Active,
    YellowCard,
    RedCard,
    NotSubscribed,
    Banned,
    Untracked,
}

impl ValidatorStatus {
    pub const ALL: [ValidatorStatus; 6] = [
        ValidatorStatus::Active,
        ValidatorStatus::YellowCard,
        ValidatorStatus::RedCard,
        ValidatorStatus::NotSubscribed,
        ValidatorStatus::Banned,
        ValidatorStatus::Untracked,
    ];

    /// Subscribed validators are the ones whose proposals are watched.
    pub fn is_subscribed(self) -> bool {
        matches!(
            self,
            ValidatorStatus::Active | ValidatorStatus::YellowCard | ValidatorStatus::RedCard
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValidatorStatus::Active => "active",
            ValidatorStatus::YellowCard => "yellow_card",
            ValidatorStatus::RedCard => "red_card",
            ValidatorStatus::NotSubscribed => "not_subscribed",
            ValidatorStatus::Banned => "banned",
            ValidatorStatus::Untracked => "untracked",
        }
    }
}

impl fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the validator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorEvent {
    ProposalOk,
    ProposalMissed,
    ProposalWrongFee,
    ManualSubscription,
    AutoSubscription,
    Unsubscribe,
}

impl ValidatorEvent {
    pub const ALL: [ValidatorEvent; 6] = [
        ValidatorEvent::ProposalOk,
        ValidatorEvent::ProposalMissed,
        ValidatorEvent::ProposalWrongFee,
        ValidatorEvent::ManualSubscription,
        ValidatorEvent::AutoSubscription,
        ValidatorEvent::Unsubscribe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ValidatorEvent::ProposalOk => "proposal_ok",
            ValidatorEvent::ProposalMissed => "proposal_missed",
            ValidatorEvent::ProposalWrongFee => "proposal_wrong_fee",
            ValidatorEvent::ManualSubscription => "manual_subscription",
            ValidatorEvent::AutoSubscription => "auto_subscription",
            ValidatorEvent::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for ValidatorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the proposer reward reached the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    /// Priority fees, the pool was the block's fee recipient.
    Vanilla,
    /// Direct transfer from the block builder.
    Mev,
}

impl fmt::Display for RewardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardType::Vanilla => f.write_str("vanilla"),
            RewardType::Mev => f.write_str("mev"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    OkPoolProposal,
    MissedProposal,
    WrongFeeRecipient,
    /// Proposal from a banned validator that still paid the pool.
    OkPoolProposalBannedValidator,
}

/// One block-level outcome attributed to a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub slot: u64,
    pub validator_index: u64,
    pub block_number: Option<u64>,
    pub reward: U256,
    pub reward_type: Option<RewardType>,
    pub block_type: BlockType,
}

/// Subscription event emitted by the smoothing pool contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub validator_index: u64,
    pub sender: Address,
    pub collateral: U256,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

/// Unsubscription event emitted by the smoothing pool contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscriptionEvent {
    pub validator_index: u64,
    pub sender: Address,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

/// Value sent to the pool by someone other than the block's fee recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donation {
    pub sender: Address,
    pub amount: U256,
    pub block_number: u64,
    pub tx_hash: B256,
}

/// Which validator statuses share pool-wide rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityPolicy {
    #[default]
    ActiveOnly,
    ActiveAndYellowCard,
}

impl EligibilityPolicy {
    pub fn is_eligible(self, status: ValidatorStatus) -> bool {
        match self {
            EligibilityPolicy::ActiveOnly => status == ValidatorStatus::Active,
            EligibilityPolicy::ActiveAndYellowCard => matches!(
                status,
                ValidatorStatus::Active | ValidatorStatus::YellowCard
            ),
        }
    }
}

impl std::str::FromStr for EligibilityPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active_only" | "active" => Ok(EligibilityPolicy::ActiveOnly),
            "active_and_yellow_card" | "active_yellow" => {
                Ok(EligibilityPolicy::ActiveAndYellowCard)
            }
            other => Err(anyhow::anyhow!("unknown eligibility policy '{other}'")),
        }
    }
}

/// Everything the oracle tracks about one validator index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub status: ValidatorStatus,
    /// Claimable balance, included in the merkle tree.
    pub accumulated_rewards: U256,
    /// Share of pool rewards not yet consolidated by a proposal.
    pub pending_rewards: U256,
    pub collateral: U256,
    pub withdrawal_address: Address,
    pub pubkey: ValidatorPubkey,
    pub proposed_blocks: Vec<BlockRecord>,
    pub missed_blocks: Vec<BlockRecord>,
    pub wrong_fee_blocks: Vec<BlockRecord>,
}

impl ValidatorInfo {
    pub fn new(withdrawal_address: Address, pubkey: ValidatorPubkey) -> Self {
        Self {
            status: ValidatorStatus::Untracked,
            accumulated_rewards: U256::ZERO,
            pending_rewards: U256::ZERO,
            collateral: U256::ZERO,
            withdrawal_address,
            pubkey,
            proposed_blocks: Vec::new(),
            missed_blocks: Vec::new(),
            wrong_fee_blocks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_mapping() {
        let json = serde_json::to_string(&ValidatorStatus::YellowCard).unwrap();
        assert_eq!(json, "\"yellow_card\"");
        let back: ValidatorStatus = serde_json::from_str("\"red_card\"").unwrap();
        assert_eq!(back, ValidatorStatus::RedCard);
        for status in ValidatorStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn test_subscribed_statuses() {
        assert!(ValidatorStatus::Active.is_subscribed());
        assert!(ValidatorStatus::YellowCard.is_subscribed());
        assert!(ValidatorStatus::RedCard.is_subscribed());
        assert!(!ValidatorStatus::NotSubscribed.is_subscribed());
        assert!(!ValidatorStatus::Banned.is_subscribed());
        assert!(!ValidatorStatus::Untracked.is_subscribed());
    }

    #[test]
    fn test_eligibility_policy() {
        let strict = EligibilityPolicy::ActiveOnly;
        assert!(strict.is_eligible(ValidatorStatus::Active));
        assert!(!strict.is_eligible(ValidatorStatus::YellowCard));

        let lenient: EligibilityPolicy = "active_and_yellow_card".parse().unwrap();
        assert!(lenient.is_eligible(ValidatorStatus::YellowCard));
        assert!(!lenient.is_eligible(ValidatorStatus::RedCard));

        assert!("everyone".parse::<EligibilityPolicy>().is_err());
    }
}
