//! Bag-of-cells: flat byte serialization of a cell tree
//!
//! Layout (big-endian):
//! - magic `b"SLC\x01"`
//! - cell count (u32)
//! - per cell, root first: ref count (u8), bit length (u16), body bytes,
//!   one u32 index per reference
//!
//! Identical subtrees are stored once. Every reference points to a later
//! index, so a decoded bag is always acyclic.

use sluice_core::{Hash, SluiceError, SluiceResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cell::{Cell, MAX_REFS};

const BOC_MAGIC: [u8; 4] = *b"SLC\x01";

/// Serialize the tree rooted at `root`
pub fn serialize_boc(root: &Cell) -> Vec<u8> {
    // post-order with dedup; reversed it lists parents before children
    let mut order: Vec<&Cell> = Vec::new();
    let mut seen: HashSet<Hash> = HashSet::new();
    collect_post_order(root, &mut order, &mut seen);
    order.reverse();

    let index: HashMap<Hash, u32> = order
        .iter()
        .enumerate()
        .map(|(i, cell)| (cell.hash(), i as u32))
        .collect();

    let mut out = Vec::new();
    out.extend_from_slice(&BOC_MAGIC);
    out.extend_from_slice(&(order.len() as u32).to_be_bytes());
    for cell in &order {
        out.push(cell.refs().len() as u8);
        out.extend_from_slice(&(cell.bit_len() as u16).to_be_bytes());
        out.extend_from_slice(cell.data());
        for r in cell.refs() {
            out.extend_from_slice(&index[&r.hash()].to_be_bytes());
        }
    }
    out
}

fn collect_post_order<'a>(cell: &'a Cell, order: &mut Vec<&'a Cell>, seen: &mut HashSet<Hash>) {
    if seen.contains(&cell.hash()) {
        return;
    }
    for r in cell.refs() {
        collect_post_order(r, order, seen);
    }
    seen.insert(cell.hash());
    order.push(cell);
}

struct RawCell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<usize>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> SluiceResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(SluiceError::MalformedCell(format!(
                "bag truncated at byte {}",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> SluiceResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> SluiceResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> SluiceResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Deserialize a bag of cells, returning its root
pub fn deserialize_boc(bytes: &[u8]) -> SluiceResult<Arc<Cell>> {
    let mut reader = Reader { bytes, pos: 0 };
    if reader.take(4)? != BOC_MAGIC {
        return Err(SluiceError::MalformedCell("bad bag-of-cells magic".into()));
    }

    let count = reader.u32()? as usize;
    if count == 0 {
        return Err(SluiceError::RootCellMissing);
    }

    let mut raw = Vec::with_capacity(count.min(4096));
    for i in 0..count {
        let ref_count = reader.u8()? as usize;
        if ref_count > MAX_REFS {
            return Err(SluiceError::TooManyRefs(MAX_REFS));
        }
        let bit_len = reader.u16()? as usize;
        let data = reader.take(bit_len.div_ceil(8))?.to_vec();
        let mut refs = Vec::with_capacity(ref_count);
        for _ in 0..ref_count {
            let target = reader.u32()? as usize;
            if target <= i || target >= count {
                return Err(SluiceError::InvalidReference(format!(
                    "cell {} references index {} of {}",
                    i, target, count
                )));
            }
            refs.push(target);
        }
        raw.push(RawCell { data, bit_len, refs });
    }
    if reader.pos != bytes.len() {
        return Err(SluiceError::MalformedCell(format!(
            "{} trailing bytes after bag",
            bytes.len() - reader.pos
        )));
    }

    // children always sit at higher indices, so build back to front
    let mut built: Vec<Option<Arc<Cell>>> = vec![None; count];
    for i in (0..count).rev() {
        let RawCell { data, bit_len, refs } = std::mem::replace(
            &mut raw[i],
            RawCell {
                data: Vec::new(),
                bit_len: 0,
                refs: Vec::new(),
            },
        );
        let children = refs
            .iter()
            .map(|&j| {
                built[j].clone().ok_or_else(|| {
                    SluiceError::InvalidReference(format!("cell {} resolves to nothing", j))
                })
            })
            .collect::<SluiceResult<Vec<_>>>()?;
        built[i] = Some(Arc::new(Cell::new(data, bit_len, children)?));
    }

    built[0].take().ok_or(SluiceError::RootCellMissing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CellBuilder;
    use proptest::prelude::*;

    fn sample_tree() -> Cell {
        let leaf = Arc::new(Cell::new(vec![0xCA, 0xFE], 16, vec![]).unwrap());
        let mut mid = CellBuilder::new();
        mid.store_u8(7).unwrap().store_ref(leaf.clone()).unwrap();
        let mid = Arc::new(mid.build().unwrap());

        let mut root = CellBuilder::new();
        root.store_uint(3, 2)
            .unwrap()
            .store_ref(mid)
            .unwrap()
            .store_ref(leaf)
            .unwrap();
        root.build().unwrap()
    }

    #[test]
    fn test_boc_roundtrip_preserves_hash() {
        let root = sample_tree();
        let bytes = serialize_boc(&root);
        let restored = deserialize_boc(&bytes).unwrap();
        assert_eq!(restored.hash(), root.hash());
        assert_eq!(*restored, root);
    }

    #[test]
    fn test_shared_subtree_stored_once() {
        let root = sample_tree();
        let bytes = serialize_boc(&root);
        let count = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(count, 3);
    }

    #[test]
    fn test_empty_bag_is_root_missing() {
        let mut bytes = BOC_MAGIC.to_vec();
        bytes.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(
            deserialize_boc(&bytes),
            Err(SluiceError::RootCellMissing)
        ));
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let mut bytes = BOC_MAGIC.to_vec();
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.push(1); // one ref
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&5u32.to_be_bytes());
        assert!(matches!(
            deserialize_boc(&bytes),
            Err(SluiceError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut bytes = BOC_MAGIC.to_vec();
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.push(1);
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(
            deserialize_boc(&bytes),
            Err(SluiceError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_truncated_and_trailing_bytes() {
        let bytes = serialize_boc(&sample_tree());
        assert!(deserialize_boc(&bytes[..bytes.len() - 1]).is_err());

        let mut extra = bytes.clone();
        extra.push(0);
        assert!(matches!(
            deserialize_boc(&extra),
            Err(SluiceError::MalformedCell(_))
        ));
        assert!(deserialize_boc(b"nope").is_err());
    }

    proptest! {
        #[test]
        fn prop_arbitrary_bag_never_panics(body in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut bytes = BOC_MAGIC.to_vec();
            bytes.extend_from_slice(&body);
            let _ = deserialize_boc(&bytes);
        }
    }
}
