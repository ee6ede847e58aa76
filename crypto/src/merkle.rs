//! Merkle proof verification and tree construction
//!
//! Nodes are hex strings. A parent is `SHA-256(decode(left) || decode(right))`
//! rendered as lower-case hex. A proof carries, per level, the sibling hash and
//! which side the running node sits on. `path` and `siblings` name the same
//! sequence; `path` only takes part in the structural checks.
//!
//! Structural defects (mismatched lengths, bad directions, empty siblings) and
//! malformed hex are errors. A well-formed proof that does not reach the root
//! is `Ok(false)`.

use serde::{Deserialize, Serialize};
use sluice_core::{Hash, SluiceError, SluiceResult};

use crate::hashing::sha256_multiple;

/// Sibling-path proof of a leaf under a root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Expected commitment (hex)
    pub root: String,
    /// Sibling hashes, leaf level first (hex); mirrors `siblings`
    pub path: Vec<String>,
    /// Sibling at each level (hex)
    pub siblings: Vec<String>,
    /// 0 when the current node is the left operand, 1 when it is the right
    pub directions: Vec<u8>,
}

impl MerkleProof {
    /// Number of levels
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    fn check_structure(&self) -> SluiceResult<()> {
        if self.path.len() != self.siblings.len() || self.siblings.len() != self.directions.len() {
            return Err(SluiceError::MerkleStructure(format!(
                "length mismatch: path={} siblings={} directions={}",
                self.path.len(),
                self.siblings.len(),
                self.directions.len()
            )));
        }
        for (level, direction) in self.directions.iter().enumerate() {
            if *direction > 1 {
                return Err(SluiceError::MerkleStructure(format!(
                    "direction {} at level {} is not 0 or 1",
                    direction, level
                )));
            }
        }
        for (level, sibling) in self.siblings.iter().enumerate() {
            if strip_prefix(sibling).is_empty() {
                return Err(SluiceError::MerkleStructure(format!(
                    "empty sibling at level {}",
                    level
                )));
            }
        }
        for (level, node) in self.path.iter().enumerate() {
            if strip_prefix(node).is_empty() {
                return Err(SluiceError::MerkleStructure(format!(
                    "empty path entry at level {}",
                    level
                )));
            }
        }
        Ok(())
    }
}

fn strip_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Lower-case, prefix-free hex, checked to decode
pub fn normalize_hex(value: &str, what: &str) -> SluiceResult<String> {
    let value = strip_prefix(value).to_ascii_lowercase();
    if value.len() % 2 != 0 {
        return Err(SluiceError::MerkleEncoding(format!(
            "{} has odd length {}",
            what,
            value.len()
        )));
    }
    if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SluiceError::MerkleEncoding(format!("{} is not hex", what)));
    }
    Ok(value)
}

/// Hash two hex nodes into their parent
pub fn hash_pair_hex(left: &str, right: &str) -> SluiceResult<String> {
    let left = hex::decode(normalize_hex(left, "left node")?)
        .map_err(|e| SluiceError::MerkleEncoding(e.to_string()))?;
    let right = hex::decode(normalize_hex(right, "right node")?)
        .map_err(|e| SluiceError::MerkleEncoding(e.to_string()))?;
    Ok(sha256_multiple(&[&left, &right]).to_hex())
}

/// Verify that `leaf` reaches `proof.root` along the proof path
pub fn verify(proof: &MerkleProof, leaf: &str) -> SluiceResult<bool> {
    proof.check_structure()?;

    // single-leaf tree
    if proof.depth() == 0 {
        return Ok(leaf == proof.root);
    }

    let mut computed = normalize_hex(leaf, "leaf")?;
    for level in 0..proof.depth() {
        let sibling = normalize_hex(&proof.siblings[level], "sibling")?;
        computed = match proof.directions[level] {
            0 => hash_pair_hex(&computed, &sibling)?,
            _ => hash_pair_hex(&sibling, &computed)?,
        };
    }

    Ok(computed == strip_prefix(&proof.root).to_ascii_lowercase())
}

/// Binary merkle tree over 32-byte leaves
///
/// A level with an odd node count pairs its last node with itself.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn new(leaves: Vec<Hash>) -> SluiceResult<Self> {
        if leaves.is_empty() {
            return Err(SluiceError::MerkleStructure("tree has no leaves".into()));
        }

        let mut levels = vec![leaves];
        while levels[levels.len() - 1].len() > 1 {
            let current = &levels[levels.len() - 1];
            let next: Vec<Hash> = current
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).unwrap_or(&pair[0]);
                    sha256_multiple(&[pair[0].as_bytes(), right.as_bytes()])
                })
                .collect();
            levels.push(next);
        }

        Ok(Self { levels })
    }

    pub fn root(&self) -> Hash {
        self.levels[self.levels.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn leaf(&self, index: usize) -> Option<Hash> {
        self.levels[0].get(index).copied()
    }

    /// Build the inclusion proof for the leaf at `index`
    pub fn proof(&self, index: usize) -> SluiceResult<MerkleProof> {
        if index >= self.leaf_count() {
            return Err(SluiceError::MerkleStructure(format!(
                "leaf index {} out of range ({} leaves)",
                index,
                self.leaf_count()
            )));
        }

        let depth = self.levels.len() - 1;
        let mut path = Vec::with_capacity(depth);
        let mut siblings = Vec::with_capacity(depth);
        let mut directions = Vec::with_capacity(depth);

        let mut position = index;
        for level in &self.levels[..depth] {
            let sibling = level.get(position ^ 1).unwrap_or(&level[position]).to_hex();
            path.push(sibling.clone());
            siblings.push(sibling);
            directions.push((position & 1) as u8);
            position /= 2;
        }

        Ok(MerkleProof {
            root: self.root().to_hex(),
            path,
            siblings,
            directions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::sha256_hash;
    use proptest::prelude::*;

    fn leaves(n: usize) -> Vec<Hash> {
        (0..n).map(|i| sha256_hash(&(i as u64).to_be_bytes())).collect()
    }

    #[test]
    fn test_empty_path_compares_leaf_to_root() {
        let proof = MerkleProof {
            root: "ab12".into(),
            path: vec![],
            siblings: vec![],
            directions: vec![],
        };
        assert!(verify(&proof, "ab12").unwrap());
        assert!(!verify(&proof, "ab13").unwrap());
    }

    #[test]
    fn test_two_level_proof() {
        let leaf = "aa11";
        let s0 = "bb22";
        let s1 = "cc33";
        let level1 = hash_pair_hex(leaf, s0).unwrap();
        let root = hash_pair_hex(s1, &level1).unwrap();

        let proof = MerkleProof {
            root: root.to_uppercase(),
            path: vec![s0.into(), s1.into()],
            siblings: vec![s0.into(), s1.into()],
            directions: vec![0, 1],
        };
        assert!(verify(&proof, leaf).unwrap());
        assert!(verify(&proof, &format!("0x{}", leaf.to_uppercase())).unwrap());

        let mut wrong_root = proof.clone();
        wrong_root.root = hash_pair_hex(&level1, s1).unwrap();
        assert!(!verify(&wrong_root, leaf).unwrap());
    }

    #[test]
    fn test_path_takes_no_part_in_hashing() {
        let tree = MerkleTree::new(leaves(5)).unwrap();
        let mut proof = tree.proof(3).unwrap();
        let leaf = tree.leaf(3).unwrap().to_hex();
        assert_eq!(proof.path, proof.siblings);
        assert!(verify(&proof, &leaf).unwrap());

        proof.path = vec!["ff".into(); proof.depth()];
        assert!(verify(&proof, &leaf).unwrap());

        proof.path[0] = "0x".into();
        assert!(matches!(
            verify(&proof, &leaf),
            Err(SluiceError::MerkleStructure(_))
        ));
    }

    #[test]
    fn test_length_mismatch_is_structural() {
        let proof = MerkleProof {
            root: "00".into(),
            path: vec!["aa".into(), "bb".into()],
            siblings: vec!["cc".into()],
            directions: vec![0, 1],
        };
        assert!(matches!(
            verify(&proof, "aa"),
            Err(SluiceError::MerkleStructure(_))
        ));
    }

    #[test]
    fn test_bad_direction_is_structural() {
        let proof = MerkleProof {
            root: "00".into(),
            path: vec!["aa".into()],
            siblings: vec!["cc".into()],
            directions: vec![2],
        };
        assert!(matches!(
            verify(&proof, "aa"),
            Err(SluiceError::MerkleStructure(_))
        ));
    }

    #[test]
    fn test_empty_sibling_is_structural() {
        let proof = MerkleProof {
            root: "00".into(),
            path: vec!["aa".into()],
            siblings: vec!["0x".into()],
            directions: vec![0],
        };
        assert!(matches!(
            verify(&proof, "aa"),
            Err(SluiceError::MerkleStructure(_))
        ));
    }

    #[test]
    fn test_malformed_sibling_is_encoding_error() {
        let mut proof = MerkleProof {
            root: "00".into(),
            path: vec!["aa".into()],
            siblings: vec!["zz".into()],
            directions: vec![0],
        };
        assert!(matches!(
            verify(&proof, "aa"),
            Err(SluiceError::MerkleEncoding(_))
        ));

        proof.siblings = vec!["abc".into()];
        assert!(matches!(
            verify(&proof, "aa"),
            Err(SluiceError::MerkleEncoding(_))
        ));
    }

    #[test]
    fn test_prefixed_and_uppercase_hex_accepted() {
        let tree = MerkleTree::new(leaves(4)).unwrap();
        let mut proof = tree.proof(2).unwrap();
        proof.siblings = proof
            .siblings
            .iter()
            .map(|s| format!("0x{}", s.to_uppercase()))
            .collect();
        assert!(verify(&proof, &tree.leaf(2).unwrap().to_hex()).unwrap());
    }

    #[test]
    fn test_tree_proofs_verify_for_every_leaf() {
        for n in 1..=9 {
            let tree = MerkleTree::new(leaves(n)).unwrap();
            for i in 0..n {
                let proof = tree.proof(i).unwrap();
                let leaf = tree.leaf(i).unwrap().to_hex();
                assert!(verify(&proof, &leaf).unwrap(), "n={} i={}", n, i);
            }
        }
    }

    #[test]
    fn test_wrong_leaf_fails() {
        let tree = MerkleTree::new(leaves(4)).unwrap();
        let proof = tree.proof(1).unwrap();
        assert!(!verify(&proof, &tree.leaf(0).unwrap().to_hex()).unwrap());
    }

    #[test]
    fn test_empty_tree_rejected() {
        assert!(MerkleTree::new(vec![]).is_err());
        assert!(MerkleTree::new(leaves(2)).unwrap().proof(2).is_err());
    }

    proptest! {
        #[test]
        fn prop_sibling_byte_tamper_fails(
            n in 2usize..16,
            pick in any::<prop::sample::Index>(),
            level_pick in any::<prop::sample::Index>(),
            byte_pick in 0usize..32,
            mask in 1u8..=255,
        ) {
            let tree = MerkleTree::new(leaves(n)).unwrap();
            let index = pick.index(n);
            let mut proof = tree.proof(index).unwrap();
            let leaf = tree.leaf(index).unwrap().to_hex();
            let level = level_pick.index(proof.depth());

            let mut bytes = hex::decode(&proof.siblings[level]).unwrap();
            bytes[byte_pick] ^= mask;
            proof.siblings[level] = hex::encode(bytes);

            prop_assert!(!verify(&proof, &leaf).unwrap());
        }

        #[test]
        fn prop_direction_flip_fails(
            exp in 1u32..5,
            pick in any::<prop::sample::Index>(),
            level_pick in any::<prop::sample::Index>(),
        ) {
            // power-of-two trees never pair a node with itself
            let n = 1usize << exp;
            let tree = MerkleTree::new(leaves(n)).unwrap();
            let index = pick.index(n);
            let mut proof = tree.proof(index).unwrap();
            let leaf = tree.leaf(index).unwrap().to_hex();
            let level = level_pick.index(proof.depth());

            proof.directions[level] ^= 1;
            prop_assert!(!verify(&proof, &leaf).unwrap());
        }

        #[test]
        fn prop_verify_is_deterministic(n in 1usize..12, pick in any::<prop::sample::Index>()) {
            let tree = MerkleTree::new(leaves(n)).unwrap();
            let index = pick.index(n);
            let proof = tree.proof(index).unwrap();
            let leaf = tree.leaf(index).unwrap().to_hex();
            let first = verify(&proof, &leaf).unwrap();
            prop_assert_eq!(first, verify(&proof, &leaf).unwrap());
            prop_assert!(first);
        }
    }
}
