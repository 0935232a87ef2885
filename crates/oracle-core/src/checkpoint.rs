use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::merkle::{MerkleTree, leaf_hash, verify_proof};
use crate::state::OracleState;

/// Total claimable balance of one withdrawal address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLeaf {
    pub withdrawal_address: Address,
    pub accumulated_balance: U256,
}

impl RawLeaf {
    pub fn hash(&self) -> B256 {
        leaf_hash(self.withdrawal_address, self.accumulated_balance)
    }
}

/// Merkle root plus everything needed to claim against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTree {
    pub root: B256,
    pub leaves: BTreeMap<Address, RawLeaf>,
    pub proofs: BTreeMap<Address, Vec<B256>>,
}

/// Outcome of building the claim tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeOutcome {
    Built(ClaimTree),
    /// Fewer than two leaves, no tree can be committed.
    NotEnoughData { leaves: Vec<RawLeaf> },
}

impl TreeOutcome {
    pub fn has_enough_data(&self) -> bool {
        matches!(self, TreeOutcome::Built(_))
    }

    pub fn root(&self) -> Option<B256> {
        match self {
            TreeOutcome::Built(tree) => Some(tree.root),
            TreeOutcome::NotEnoughData { .. } => None,
        }
    }
}

/// Immutable snapshot committed at a checkpoint slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainState {
    pub slot: u64,
    pub block_number: Option<u64>,
    pub merkle_root: B256,
    pub leaves: BTreeMap<Address, RawLeaf>,
    pub proofs: BTreeMap<Address, Vec<B256>>,
    /// Root update transaction, when this instance submitted one.
    pub tx_hash: Option<B256>,
}

impl OnchainState {
    pub fn from_tree(slot: u64, block_number: Option<u64>, tree: ClaimTree) -> Self {
        Self {
            slot,
            block_number,
            merkle_root: tree.root,
            leaves: tree.leaves,
            proofs: tree.proofs,
            tx_hash: None,
        }
    }

    /// Whether the stored proof of `address` still verifies against the root.
    pub fn verify(&self, address: Address) -> bool {
        match (self.leaves.get(&address), self.proofs.get(&address)) {
            (Some(leaf), Some(proof)) => verify_proof(proof, self.merkle_root, leaf.hash()),
            _ => false,
        }
    }
}

/// One leaf per withdrawal address plus the pool fee leaf, sorted by address.
///
/// Every tracked validator contributes, whatever its status: banned and
/// unsubscribed validators keep what they already accumulated.
pub fn aggregate_validators_indexes(state: &OracleState) -> Vec<RawLeaf> {
    let mut balances: BTreeMap<Address, U256> = BTreeMap::new();
    for validator in state.validators.values() {
        *balances.entry(validator.withdrawal_address).or_default() +=
            validator.accumulated_rewards;
    }
    *balances.entry(state.pool_fee_address).or_default() += state.pool_accumulated_fees;

    // BTreeMap<Address, _> iterates in byte order, same as lowercase hex order
    balances
        .into_iter()
        .map(|(withdrawal_address, accumulated_balance)| RawLeaf {
            withdrawal_address,
            accumulated_balance,
        })
        .collect()
}

/// Build the claim tree for the current ledger.
pub fn generate_tree_from_state(state: &OracleState) -> TreeOutcome {
    let leaves = aggregate_validators_indexes(state);
    if leaves.len() < 2 {
        return TreeOutcome::NotEnoughData { leaves };
    }

    let hashes = leaves.iter().map(RawLeaf::hash).collect();
    let Some(tree) = MerkleTree::new(hashes) else {
        return TreeOutcome::NotEnoughData { leaves };
    };

    let mut proofs = BTreeMap::new();
    for (i, leaf) in leaves.iter().enumerate() {
        proofs.insert(leaf.withdrawal_address, tree.proof(i).unwrap_or_default());
    }

    TreeOutcome::Built(ClaimTree {
        root: tree.root(),
        leaves: leaves
            .into_iter()
            .map(|leaf| (leaf.withdrawal_address, leaf))
            .collect(),
        proofs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::types::{ValidatorPubkey, ValidatorStatus};

    fn add(state: &mut OracleState, index: u64, address: Address, accumulated: u64) {
        let v = state.track_validator(index, address, ValidatorPubkey::ZERO);
        v.status = ValidatorStatus::Active;
        v.accumulated_rewards = U256::from(accumulated);
    }

    #[test]
    fn test_aggregation_by_address() {
        let a = Address::repeat_byte(0x0a);
        let b = Address::repeat_byte(0x0b);
        let mut state = OracleState::new(&test_config());
        add(&mut state, 1, b, 5_000);
        add(&mut state, 2, a, 10_000);
        add(&mut state, 3, a, 20_000);

        let leaves = aggregate_validators_indexes(&state);
        assert_eq!(
            leaves,
            vec![
                RawLeaf {
                    withdrawal_address: a,
                    accumulated_balance: U256::from(30_000u64),
                },
                RawLeaf {
                    withdrawal_address: b,
                    accumulated_balance: U256::from(5_000u64),
                },
                RawLeaf {
                    withdrawal_address: state.pool_fee_address,
                    accumulated_balance: U256::ZERO,
                },
            ]
        );
    }

    #[test]
    fn test_pool_fee_leaf_merges_with_shared_address() {
        let mut state = OracleState::new(&test_config());
        let fee_address = state.pool_fee_address;
        add(&mut state, 1, fee_address, 100);
        state.pool_accumulated_fees = U256::from(11u64);

        let leaves = aggregate_validators_indexes(&state);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].accumulated_balance, U256::from(111u64));
    }

    #[test]
    fn test_not_enough_data() {
        let state = OracleState::new(&test_config());
        let leaves = aggregate_validators_indexes(&state);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].withdrawal_address, state.pool_fee_address);

        let outcome = generate_tree_from_state(&state);
        assert!(!outcome.has_enough_data());
        assert_eq!(outcome.root(), None);
    }

    #[test]
    fn test_tree_is_deterministic_and_verifiable() {
        let mut state = OracleState::new(&test_config());
        for i in 0..5u8 {
            add(&mut state, i as u64, Address::repeat_byte(i + 1), 1_000 * (i as u64 + 1));
        }
        state.pool_accumulated_fees = U256::from(42u64);

        let first = generate_tree_from_state(&state);
        let second = generate_tree_from_state(&state);
        assert_eq!(first, second);

        let TreeOutcome::Built(tree) = first else {
            panic!("expected a tree");
        };
        assert_eq!(tree.leaves.len(), 6);
        let snapshot = OnchainState::from_tree(110, Some(1_100), tree);
        for address in snapshot.leaves.keys() {
            assert!(snapshot.verify(*address));
        }
        assert!(!snapshot.verify(Address::repeat_byte(0x77)));
    }

    #[test]
    fn test_root_changes_with_balances() {
        let mut state = OracleState::new(&test_config());
        add(&mut state, 1, Address::repeat_byte(1), 10);
        let before = generate_tree_from_state(&state).root();

        state.validators.get_mut(&1).unwrap().accumulated_rewards = U256::from(11u64);
        let after = generate_tree_from_state(&state).root();
        assert!(before.is_some());
        assert_ne!(before, after);
    }

    #[test]
    fn test_onchain_state_json() {
        let mut state = OracleState::new(&test_config());
        add(&mut state, 1, Address::repeat_byte(1), 10);
        let TreeOutcome::Built(tree) = generate_tree_from_state(&state) else {
            panic!("expected a tree");
        };
        let snapshot = OnchainState::from_tree(110, None, tree);
        let json = serde_json::to_value(&snapshot).unwrap();
        let root = json["merkle_root"].as_str().unwrap();
        assert!(root.starts_with("0x"));
        assert_eq!(root.len(), 66);

        let back: OnchainState = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
