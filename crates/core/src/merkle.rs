//! Merkle tree over ordered leaves
//!
//! Leaves keep their input order: the root depends on it, so callers must feed
//! leaves in a documented order (the proof builder uses ascending batch start
//! time). Parents are `H(left || right)`; an odd node at the end of a level is
//! promoted unchanged.
//!
//! # Features
//! - SHA-256 (default) or BLAKE3 node hashing
//! - Inclusion proof generation and verification

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Merkle tree errors
#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("Empty leaf set: cannot build Merkle tree from empty leaves")]
    EmptyLeaves,

    #[error("Invalid leaf index: {index} (tree has {count} leaves)")]
    InvalidLeafIndex { index: usize, count: usize },

    #[error("Proof verification failed: computed root {computed} != expected {expected}")]
    ProofVerificationFailed { computed: String, expected: String },

    #[error("Invalid proof: {0}")]
    InvalidProof(String),
}

pub type Result<T> = std::result::Result<T, MerkleError>;

/// A 32-byte digest
pub type Hash = [u8; 32];

/// Hash function used for both leaves and interior nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    /// Digest arbitrary bytes
    pub fn digest(&self, data: &[u8]) -> Hash {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).into(),
            HashAlgorithm::Blake3 => *blake3::hash(data).as_bytes(),
        }
    }

    /// Combine two nodes: H(left || right)
    pub fn hash_pair(&self, left: &Hash, right: &Hash) -> Hash {
        match self {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(left);
                hasher.update(right);
                hasher.finalize().into()
            }
            HashAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(left);
                hasher.update(right);
                *hasher.finalize().as_bytes()
            }
        }
    }
}

/// Inclusion proof for a specific leaf
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InclusionProof {
    /// The leaf hash being proven
    pub leaf_hash: Hash,
    /// Index of the leaf in the ordered leaf list
    pub leaf_index: usize,
    /// Sibling hashes along the path to root (bottom-up)
    pub sibling_hashes: Vec<Hash>,
    /// Direction bits: true = sibling is on right, false = sibling is on left
    pub direction_bits: Vec<bool>,
    /// The expected root hash
    pub root_hash: Hash,
    /// Hash function the tree was built with
    pub algorithm: HashAlgorithm,
}

/// Merkle tree structure
#[derive(Debug, Clone)]
pub struct MerkleTree {
    algorithm: HashAlgorithm,
    /// All nodes in the tree, level by level (leaves are level 0)
    levels: Vec<Vec<Hash>>,
    root: Hash,
}

impl MerkleTree {
    /// Build a Merkle tree from ordered leaf hashes
    ///
    /// # Returns
    /// * `Ok(MerkleTree)` - The constructed tree
    /// * `Err(MerkleError::EmptyLeaves)` - If leaves are empty
    pub fn build(leaves: Vec<Hash>, algorithm: HashAlgorithm) -> Result<Self> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyLeaves);
        }

        let mut levels = vec![leaves];

        // Build tree bottom-up
        loop {
            let current_level = match levels.last() {
                Some(level) if level.len() > 1 => level,
                _ => break,
            };

            let next_level: Vec<Hash> = current_level
                .chunks(2)
                .map(|chunk| match chunk {
                    [left, right] => algorithm.hash_pair(left, right),
                    // Odd node out - promote it unchanged
                    _ => chunk[0],
                })
                .collect();

            levels.push(next_level);
        }

        let root = levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .ok_or(MerkleError::EmptyLeaves)?;

        Ok(Self {
            algorithm,
            levels,
            root,
        })
    }

    /// Get the root hash
    pub fn root(&self) -> Hash {
        self.root
    }

    /// Root as lowercase hex
    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }

    /// Get the leaf count
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Generate an inclusion proof for the leaf at the given index
    pub fn generate_proof(&self, leaf_index: usize) -> Result<InclusionProof> {
        let leaves = &self.levels[0];
        if leaf_index >= leaves.len() {
            return Err(MerkleError::InvalidLeafIndex {
                index: leaf_index,
                count: leaves.len(),
            });
        }

        let leaf_hash = leaves[leaf_index];
        let mut sibling_hashes = Vec::new();
        let mut direction_bits = Vec::new();
        let mut current_index = leaf_index;

        // Traverse from leaf to root, collecting siblings
        for level_nodes in &self.levels[..self.levels.len() - 1] {
            let is_right_child = current_index % 2 == 1;
            let sibling_index = if is_right_child {
                Some(current_index - 1)
            } else if current_index + 1 < level_nodes.len() {
                Some(current_index + 1)
            } else {
                // Promoted odd node, no sibling at this level
                None
            };

            if let Some(sibling_index) = sibling_index {
                sibling_hashes.push(level_nodes[sibling_index]);
                direction_bits.push(!is_right_child);
            }

            current_index /= 2;
        }

        Ok(InclusionProof {
            leaf_hash,
            leaf_index,
            sibling_hashes,
            direction_bits,
            root_hash: self.root,
            algorithm: self.algorithm,
        })
    }

    /// Verify an inclusion proof
    pub fn verify_proof(proof: &InclusionProof) -> Result<bool> {
        if proof.sibling_hashes.len() != proof.direction_bits.len() {
            return Err(MerkleError::InvalidProof(
                "Sibling hashes and direction bits length mismatch".to_string(),
            ));
        }

        let mut current_hash = proof.leaf_hash;

        for (sibling, &sibling_on_right) in
            proof.sibling_hashes.iter().zip(proof.direction_bits.iter())
        {
            current_hash = if sibling_on_right {
                proof.algorithm.hash_pair(&current_hash, sibling)
            } else {
                proof.algorithm.hash_pair(sibling, &current_hash)
            };
        }

        if current_hash == proof.root_hash {
            Ok(true)
        } else {
            Err(MerkleError::ProofVerificationFailed {
                computed: hex::encode(current_hash),
                expected: hex::encode(proof.root_hash),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_hash(value: u8) -> Hash {
        let mut hash = [0u8; 32];
        hash[0] = value;
        hash
    }

    fn leaves(count: u8) -> Vec<Hash> {
        (1..=count).map(create_test_hash).collect()
    }

    #[test]
    fn test_build_merkle_tree_single_leaf() {
        let tree = MerkleTree::build(leaves(1), HashAlgorithm::Sha256).unwrap();

        assert_eq!(tree.root(), create_test_hash(1));
        assert_eq!(tree.leaf_count(), 1);
    }

    #[test]
    fn test_build_rejects_empty_leaves() {
        let result = MerkleTree::build(Vec::new(), HashAlgorithm::Sha256);
        assert!(matches!(result, Err(MerkleError::EmptyLeaves)));
    }

    #[test]
    fn test_two_leaves_root_is_pair_hash() {
        let tree = MerkleTree::build(leaves(2), HashAlgorithm::Sha256).unwrap();

        let mut concatenated = create_test_hash(1).to_vec();
        concatenated.extend_from_slice(&create_test_hash(2));
        assert_eq!(tree.root(), HashAlgorithm::Sha256.digest(&concatenated));
    }

    #[test]
    fn test_odd_leaf_is_promoted() {
        let tree = MerkleTree::build(leaves(3), HashAlgorithm::Sha256).unwrap();

        let left = HashAlgorithm::Sha256.hash_pair(&create_test_hash(1), &create_test_hash(2));
        let expected = HashAlgorithm::Sha256.hash_pair(&left, &create_test_hash(3));
        assert_eq!(tree.root(), expected);
        assert_eq!(tree.leaf_count(), 3);
    }

    #[test]
    fn test_root_depends_on_leaf_order() {
        let forward = MerkleTree::build(leaves(4), HashAlgorithm::Sha256).unwrap();
        let mut reversed_leaves = leaves(4);
        reversed_leaves.reverse();
        let reversed = MerkleTree::build(reversed_leaves, HashAlgorithm::Sha256).unwrap();

        assert_ne!(forward.root(), reversed.root());
    }

    #[test]
    fn test_algorithms_produce_different_roots() {
        let sha = MerkleTree::build(leaves(4), HashAlgorithm::Sha256).unwrap();
        let b3 = MerkleTree::build(leaves(4), HashAlgorithm::Blake3).unwrap();

        assert_ne!(sha.root(), b3.root());
        assert_eq!(sha.root_hex().len(), 64);
        assert_eq!(sha.root_hex(), sha.root_hex().to_lowercase());
    }

    #[test]
    fn test_all_proofs_verify() {
        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Blake3] {
            let tree = MerkleTree::build(leaves(5), algorithm).unwrap();
            for i in 0..5 {
                let proof = tree.generate_proof(i).unwrap();
                assert!(MerkleTree::verify_proof(&proof).unwrap());
            }
        }
    }

    #[test]
    fn test_proof_verification_fails_on_tampered_leaf() {
        let tree = MerkleTree::build(leaves(4), HashAlgorithm::Sha256).unwrap();
        let mut proof = tree.generate_proof(1).unwrap();

        proof.leaf_hash = create_test_hash(99);

        assert!(MerkleTree::verify_proof(&proof).is_err());
    }

    #[test]
    fn test_proof_for_out_of_range_index() {
        let tree = MerkleTree::build(leaves(2), HashAlgorithm::Sha256).unwrap();
        assert!(matches!(
            tree.generate_proof(2),
            Err(MerkleError::InvalidLeafIndex { index: 2, count: 2 })
        ));
    }
}
