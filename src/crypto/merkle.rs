//! Merkle tree implementation
//!
//! The tree is an arena of layers: layer 0 holds the leaves, the last layer
//! holds the root. A node at `(layer, i)` pairs with `i ^ 1` and its parent
//! is `(layer + 1, i / 2)`. An odd trailing node has no sibling and is
//! promoted unchanged.

use super::{hash_sorted_pair, Hash};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error("Hash not found in merkle tree leaves")]
    HashNotFound,
}

/// Merkle tree over an ordered list of hashes
#[derive(Debug, Clone)]
pub struct MerkleTree {
    layers: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Build a tree from leaf hashes, in order
    pub fn new(leaves: &[Hash]) -> Self {
        let mut layers = vec![leaves.to_vec()];
        while let Some(current) = layers.last().filter(|layer| layer.len() > 1) {
            let next: Vec<Hash> = current
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => hash_sorted_pair(a, b),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            layers.push(next);
        }
        Self { layers }
    }

    /// Root hash, `None` for an empty tree
    pub fn root(&self) -> Option<Hash> {
        self.layers.last().and_then(|layer| layer.first()).copied()
    }

    /// Sibling hashes from leaf to root. Promoted steps contribute nothing.
    pub fn path(&self, leaf: &Hash) -> Result<Vec<Hash>, MerkleError> {
        let mut index = self.layers[0]
            .iter()
            .position(|h| h == leaf)
            .ok_or(MerkleError::HashNotFound)?;

        let mut path = Vec::new();
        for layer in &self.layers[..self.layers.len() - 1] {
            if let Some(sibling) = layer.get(index ^ 1) {
                path.push(*sibling);
            }
            index /= 2;
        }
        Ok(path)
    }

    /// Check a proof produced by [`MerkleTree::path`] against this root
    pub fn verify_path(&self, leaf: &Hash, path: &[Hash]) -> bool {
        match self.root() {
            Some(root) => verify_merkle_path(leaf, path, &root),
            None => false,
        }
    }
}

/// Fold a proof without the tree at hand
pub fn verify_merkle_path(leaf: &Hash, path: &[Hash], root: &Hash) -> bool {
    let folded = path
        .iter()
        .fold(*leaf, |current, sibling| hash_sorted_pair(&current, sibling));
    folded == *root
}

/// Merkle root of a list of hashes, `None` when empty
pub fn compute_merkle_root(hashes: &[Hash]) -> Option<Hash> {
    MerkleTree::new(hashes).root()
}
