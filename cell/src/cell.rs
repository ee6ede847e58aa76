//! Immutable cell: a bit body plus ordered references

use sluice_core::{Hash, SluiceError, SluiceResult};
use sluice_crypto::hashing::sha256_hash;
use std::fmt;
use std::sync::Arc;

use crate::slice::CellSlice;

/// Maximum body width of a single cell
pub const MAX_BITS: usize = 2047;

/// Maximum number of references held by a single cell
pub const MAX_REFS: usize = 4;

/// A bounded bit sequence with references to child cells
///
/// Depth and content hash are computed once, on construction. The hash covers
/// the body and, depth-first, the hashes of every referenced cell.
#[derive(Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
    depth: u16,
    hash: Hash,
}

impl Cell {
    pub fn new(mut data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Cell>>) -> SluiceResult<Self> {
        if bit_len > MAX_BITS {
            return Err(SluiceError::CellOverflow {
                required: bit_len,
                capacity: MAX_BITS,
            });
        }
        if refs.len() > MAX_REFS {
            return Err(SluiceError::TooManyRefs(MAX_REFS));
        }
        if data.len() != bit_len.div_ceil(8) {
            return Err(SluiceError::MalformedCell(format!(
                "{} data bytes for {} bits",
                data.len(),
                bit_len
            )));
        }

        // bits past bit_len never contribute to the hash
        if bit_len % 8 != 0 {
            if let Some(last) = data.last_mut() {
                *last &= 0xFFu8 << (8 - bit_len % 8);
            }
        }

        let depth = refs
            .iter()
            .map(|r| r.depth.saturating_add(1))
            .max()
            .unwrap_or(0);

        let mut repr = Vec::with_capacity(3 + data.len() + refs.len() * 34);
        repr.push(refs.len() as u8);
        repr.extend_from_slice(&(bit_len as u16).to_be_bytes());
        repr.extend_from_slice(&data);
        for r in &refs {
            repr.extend_from_slice(&r.depth.to_be_bytes());
        }
        for r in &refs {
            repr.extend_from_slice(r.hash.as_bytes());
        }
        let hash = sha256_hash(&repr);

        Ok(Self {
            data,
            bit_len,
            refs,
            depth,
            hash,
        })
    }

    /// Cell with no bits and no references
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            bit_len: 0,
            refs: Vec::new(),
            depth: 0,
            hash: sha256_hash(&[0, 0, 0]),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    pub fn reference(&self, index: usize) -> SluiceResult<&Arc<Cell>> {
        self.refs.get(index).ok_or_else(|| {
            SluiceError::InvalidReference(format!(
                "reference {} of {} does not exist",
                index,
                self.refs.len()
            ))
        })
    }

    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Content hash over body and referenced cells
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Start reading this cell's fields
    pub fn parse(&self) -> CellSlice<'_> {
        CellSlice::new(self)
    }

    pub(crate) fn bit_at(&self, index: usize) -> bool {
        (self.data[index / 8] >> (7 - index % 8)) & 1 == 1
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("bits", &self.bit_len)
            .field("data", &hex::encode(&self.data))
            .field("refs", &self.refs.len())
            .field("hash", &self.hash)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cell_matches_constructed() {
        let built = Cell::new(vec![], 0, vec![]).unwrap();
        assert_eq!(built, Cell::empty());
        assert_eq!(built.hash(), Cell::empty().hash());
    }

    #[test]
    fn test_trailing_bits_are_masked() {
        let a = Cell::new(vec![0b1010_1111], 4, vec![]).unwrap();
        let b = Cell::new(vec![0b1010_0000], 4, vec![]).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.data(), &[0b1010_0000]);
    }

    #[test]
    fn test_hash_covers_references() {
        let leaf_a = Arc::new(Cell::new(vec![1], 8, vec![]).unwrap());
        let leaf_b = Arc::new(Cell::new(vec![2], 8, vec![]).unwrap());

        let parent_a = Cell::new(vec![], 0, vec![leaf_a.clone()]).unwrap();
        let parent_b = Cell::new(vec![], 0, vec![leaf_b]).unwrap();
        assert_ne!(parent_a.hash(), parent_b.hash());
        assert_eq!(parent_a.depth(), 1);

        let grandparent = Cell::new(vec![], 0, vec![Arc::new(parent_a), leaf_a]).unwrap();
        assert_eq!(grandparent.depth(), 2);
    }

    #[test]
    fn test_limits_enforced() {
        let too_wide = Cell::new(vec![0; 256], MAX_BITS + 1, vec![]);
        assert!(matches!(too_wide, Err(SluiceError::CellOverflow { .. })));

        let child = Arc::new(Cell::empty());
        let too_many = Cell::new(vec![], 0, vec![child; MAX_REFS + 1]);
        assert!(matches!(too_many, Err(SluiceError::TooManyRefs(_))));

        let short = Cell::new(vec![], 8, vec![]);
        assert!(matches!(short, Err(SluiceError::MalformedCell(_))));
    }

    #[test]
    fn test_missing_reference() {
        let cell = Cell::empty();
        assert!(matches!(
            cell.reference(0),
            Err(SluiceError::InvalidReference(_))
        ));
    }
}
