//! Cell slice: sequential reader over a cell's bits and references

use sluice_core::{Hash, SluiceError, SluiceResult};
use std::sync::Arc;

use crate::cell::Cell;

/// Read cursor over a cell
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    pub fn new(cell: &'a Cell) -> Self {
        Self {
            cell,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len() - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.cell.refs().len() - self.ref_pos
    }

    fn ensure_bits(&self, bits: usize) -> SluiceResult<()> {
        if bits > self.remaining_bits() {
            return Err(SluiceError::CellUnderflow {
                requested: bits,
                remaining: self.remaining_bits(),
            });
        }
        Ok(())
    }

    pub fn load_bit(&mut self) -> SluiceResult<bool> {
        self.ensure_bits(1)?;
        let bit = self.cell.bit_at(self.bit_pos);
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> SluiceResult<u128> {
        if bits > 128 {
            return Err(SluiceError::BitWidthOverflow {
                field: "uint".into(),
                bits,
            });
        }
        self.ensure_bits(bits)?;
        let mut value = 0u128;
        for _ in 0..bits {
            value = (value << 1) | self.cell.bit_at(self.bit_pos) as u128;
            self.bit_pos += 1;
        }
        Ok(value)
    }

    pub fn load_u8(&mut self) -> SluiceResult<u8> {
        Ok(self.load_uint(8)? as u8)
    }

    pub fn load_u32(&mut self) -> SluiceResult<u32> {
        Ok(self.load_uint(32)? as u32)
    }

    pub fn load_u64(&mut self) -> SluiceResult<u64> {
        Ok(self.load_uint(64)? as u64)
    }

    pub fn load_bytes(&mut self, len: usize) -> SluiceResult<Vec<u8>> {
        self.ensure_bits(len * 8)?;
        let mut bytes = Vec::with_capacity(len);
        for _ in 0..len {
            bytes.push(self.load_uint(8)? as u8);
        }
        Ok(bytes)
    }

    pub fn load_array<const N: usize>(&mut self) -> SluiceResult<[u8; N]> {
        let bytes = self.load_bytes(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }

    pub fn load_hash(&mut self) -> SluiceResult<Hash> {
        Ok(Hash::from_bytes(self.load_array::<32>()?))
    }

    pub fn load_coins(&mut self) -> SluiceResult<u128> {
        let len = self.load_uint(4)? as usize;
        let value = self.load_uint(len * 8)?;
        // shortest form only, so each amount has exactly one encoding
        if len > 0 && value >> ((len - 1) * 8) == 0 {
            return Err(SluiceError::MalformedCell(format!(
                "coins value {} padded to {} bytes",
                value, len
            )));
        }
        Ok(value)
    }

    pub fn load_ref(&mut self) -> SluiceResult<Arc<Cell>> {
        let cell = self.cell.reference(self.ref_pos)?.clone();
        self.ref_pos += 1;
        Ok(cell)
    }

    /// Counterpart of `CellBuilder::store_maybe_ref`
    pub fn load_maybe_ref(&mut self) -> SluiceResult<Option<Arc<Cell>>> {
        if !self.load_bit()? {
            return Ok(None);
        }
        if self.remaining_refs() == 0 {
            return Err(SluiceError::InvalidReference(
                "reference flag set but no reference present".into(),
            ));
        }
        self.load_ref().map(Some)
    }

    /// Require that every bit and reference has been consumed
    pub fn end_parse(&self) -> SluiceResult<()> {
        if self.remaining_bits() != 0 {
            return Err(SluiceError::BitWidthMismatch {
                expected: self.bit_pos,
                found: self.cell.bit_len(),
            });
        }
        if self.remaining_refs() != 0 {
            return Err(SluiceError::MalformedCell(format!(
                "{} unread references",
                self.remaining_refs()
            )));
        }
        Ok(())
    }
}
