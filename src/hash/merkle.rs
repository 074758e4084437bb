//! Binary Merkle tree over 32-byte SHA-256 leaves.
//!
//! Each internal node is `SHA-256(min(l, r) || max(l, r))`, so proofs carry
//! no left/right markers. A tree with a single leaf has that leaf as its root.

use sha2::{Digest, Sha256};

/// A 32-byte node value.
pub type Hash = [u8; 32];

/// What happens to the trailing node of a layer with odd cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OddLeaf {
    /// Pair the node with itself.
    #[default]
    Duplicate,
    /// Carry the node to the next layer unchanged.
    Promote,
}

/// Tree construction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MerkleOptions {
    /// Sort leaves before building so insertion order does not matter.
    pub sort_leaves: bool,
    pub odd_leaf: OddLeaf,
}

impl Default for MerkleOptions {
    fn default() -> Self {
        Self {
            sort_leaves: true,
            odd_leaf: OddLeaf::Duplicate,
        }
    }
}

/// Hash two nodes in sorted order.
pub fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(lo);
    hasher.update(hi);
    hasher.finalize().into()
}

/// A fully materialized Merkle tree.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `layers[0]` holds the leaves; the last layer holds the root.
    layers: Vec<Vec<Hash>>,
    options: MerkleOptions,
}

impl MerkleTree {
    /// Build a tree from precomputed leaf hashes.
    pub fn from_hashes(leaves: impl IntoIterator<Item = Hash>, options: MerkleOptions) -> Self {
        let mut leaves: Vec<Hash> = leaves.into_iter().collect();
        if options.sort_leaves {
            leaves.sort_unstable();
        }

        let mut layers = vec![leaves];
        while layers.last().is_some_and(|layer| layer.len() > 1) {
            let current = &layers[layers.len() - 1];
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let left = &pair[0];
                match (pair.get(1), options.odd_leaf) {
                    (Some(right), _) => next.push(hash_pair(left, right)),
                    (None, OddLeaf::Duplicate) => next.push(hash_pair(left, left)),
                    (None, OddLeaf::Promote) => next.push(*left),
                }
            }
            layers.push(next);
        }

        Self { layers, options }
    }

    /// Build a tree whose leaves are the SHA-256 of each item.
    pub fn from_data<T: AsRef<[u8]>>(
        items: impl IntoIterator<Item = T>,
        options: MerkleOptions,
    ) -> Self {
        Self::from_hashes(
            items
                .into_iter()
                .map(|item| Sha256::digest(item.as_ref()).into()),
            options,
        )
    }

    /// Leaves in tree order (sorted if the options asked for it).
    pub fn leaves(&self) -> &[Hash] {
        &self.layers[0]
    }

    pub fn options(&self) -> MerkleOptions {
        self.options
    }

    /// Root hash, or `None` for an empty tree.
    pub fn root(&self) -> Option<Hash> {
        self.layers.last().and_then(|top| top.first().copied())
    }

    /// Sibling hashes from `leaf` up to (not including) the root.
    ///
    /// Returns `None` when `leaf` is not in the tree.
    pub fn proof(&self, leaf: &Hash) -> Option<Vec<Hash>> {
        let mut index = self.leaves().iter().position(|l| l == leaf)?;
        let mut proof = Vec::with_capacity(self.layers.len());

        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = index ^ 1;
            if sibling < layer.len() {
                proof.push(layer[sibling]);
            } else if self.options.odd_leaf == OddLeaf::Duplicate {
                proof.push(layer[index]);
            }
            index /= 2;
        }

        Some(proof)
    }

    /// Fold `proof` onto `leaf` and compare against `root`.
    pub fn verify(proof: &[Hash], leaf: &Hash, root: &Hash) -> bool {
        let computed = proof
            .iter()
            .fold(*leaf, |node, sibling| hash_pair(&node, sibling));
        &computed == root
    }
}
