use alloy::primitives::{Address, B256, U256, keccak256};
use alloy::sol_types::SolValue;

/// Leaf hash checked by the pool contract: `keccak256(abi.encodePacked(address, uint256))`.
pub fn leaf_hash(address: Address, balance: U256) -> B256 {
    keccak256((address, balance).abi_encode_packed())
}

/// Hash of two sibling nodes, smaller one first.
pub fn hash_pair(a: B256, b: B256) -> B256 {
    let (left, right) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_slice());
    buf[32..].copy_from_slice(right.as_slice());
    keccak256(buf)
}

/// Binary keccak merkle tree with sorted sibling pairs.
///
/// A node without a sibling is promoted to the next level unchanged, so its
/// proof simply has one element less.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<B256>>,
}

impl MerkleTree {
    /// Build a tree from leaf hashes. Returns `None` for an empty input.
    pub fn new(leaves: Vec<B256>) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }

        let mut levels = vec![leaves];
        while levels.last().map_or(0, Vec::len) > 1 {
            let current = levels.last().map(Vec::as_slice).unwrap_or_default();
            let next: Vec<B256> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(*left, *right),
                    _ => pair[0],
                })
                .collect();
            levels.push(next);
        }
        Some(Self { levels })
    }

    pub fn root(&self) -> B256 {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Sibling path from leaf `index` up to the root.
    pub fn proof(&self, index: usize) -> Option<Vec<B256>> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut proof = Vec::new();
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = position ^ 1;
            if let Some(node) = level.get(sibling) {
                proof.push(*node);
            }
            position /= 2;
        }
        Some(proof)
    }
}

/// Check a proof the way the on-chain verifier does.
pub fn verify_proof(proof: &[B256], root: B256, leaf: B256) -> bool {
    proof.iter().fold(leaf, |node, sibling| hash_pair(node, *sibling)) == root
}
