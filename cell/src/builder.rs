//! Cell builder: appends fixed-width fields and references

use sluice_core::{Hash, SluiceError, SluiceResult};
use std::sync::Arc;

use crate::cell::{Cell, MAX_BITS, MAX_REFS};

/// Largest byte length the 4-bit coins length prefix can announce
pub const MAX_COINS_BYTES: usize = 15;

/// Builder for a single cell
#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn remaining_bits(&self) -> usize {
        MAX_BITS - self.bit_len
    }

    fn ensure_capacity(&self, bits: usize) -> SluiceResult<()> {
        if self.bit_len + bits > MAX_BITS {
            return Err(SluiceError::CellOverflow {
                required: self.bit_len + bits,
                capacity: MAX_BITS,
            });
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let last = self.data.len() - 1;
            self.data[last] |= 1 << (7 - self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    pub fn store_bit(&mut self, bit: bool) -> SluiceResult<&mut Self> {
        self.ensure_capacity(1)?;
        self.push_bit(bit);
        Ok(self)
    }

    /// Store `value` as a big-endian unsigned integer of exactly `bits` bits
    pub fn store_uint(&mut self, value: u128, bits: usize) -> SluiceResult<&mut Self> {
        if bits > 128 || (bits < 128 && value >> bits != 0) {
            return Err(SluiceError::BitWidthOverflow {
                field: format!("value {}", value),
                bits,
            });
        }
        self.ensure_capacity(bits)?;
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(self)
    }

    pub fn store_u8(&mut self, value: u8) -> SluiceResult<&mut Self> {
        self.store_uint(value as u128, 8)
    }

    pub fn store_u32(&mut self, value: u32) -> SluiceResult<&mut Self> {
        self.store_uint(value as u128, 32)
    }

    pub fn store_u64(&mut self, value: u64) -> SluiceResult<&mut Self> {
        self.store_uint(value as u128, 64)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> SluiceResult<&mut Self> {
        self.ensure_capacity(bytes.len() * 8)?;
        for byte in bytes {
            for i in (0..8).rev() {
                self.push_bit((byte >> i) & 1 == 1);
            }
        }
        Ok(self)
    }

    pub fn store_hash(&mut self, hash: &Hash) -> SluiceResult<&mut Self> {
        self.store_bytes(hash.as_bytes())
    }

    /// Variable-length amount: 4-bit byte count followed by that many bytes
    pub fn store_coins(&mut self, amount: u128) -> SluiceResult<&mut Self> {
        let len = coins_byte_len(amount);
        if len > MAX_COINS_BYTES {
            return Err(SluiceError::BitWidthOverflow {
                field: format!("coins {}", amount),
                bits: MAX_COINS_BYTES * 8,
            });
        }
        self.ensure_capacity(4 + len * 8)?;
        self.store_uint(len as u128, 4)?;
        self.store_uint(amount, len * 8)
    }

    pub fn store_ref(&mut self, cell: Arc<Cell>) -> SluiceResult<&mut Self> {
        if self.refs.len() >= MAX_REFS {
            return Err(SluiceError::TooManyRefs(MAX_REFS));
        }
        self.refs.push(cell);
        Ok(self)
    }

    /// One flag bit, then the reference when present
    pub fn store_maybe_ref(&mut self, cell: Option<Arc<Cell>>) -> SluiceResult<&mut Self> {
        match cell {
            Some(cell) => {
                if self.refs.len() >= MAX_REFS {
                    return Err(SluiceError::TooManyRefs(MAX_REFS));
                }
                self.store_bit(true)?;
                self.store_ref(cell)
            }
            None => self.store_bit(false),
        }
    }

    pub fn build(&self) -> SluiceResult<Cell> {
        Cell::new(self.data.clone(), self.bit_len, self.refs.clone())
    }
}

/// Bytes needed to hold `amount` in the coins encoding
pub fn coins_byte_len(amount: u128) -> usize {
    (128 - amount.leading_zeros() as usize).div_ceil(8)
}

/// Bit width of `amount` in the coins encoding
pub fn coins_bit_len(amount: u128) -> usize {
    4 + coins_byte_len(amount) * 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_uint_layout() {
        let mut b = CellBuilder::new();
        b.store_uint(0b101, 3).unwrap().store_u8(0xFF).unwrap();
        let cell = b.build().unwrap();
        assert_eq!(cell.bit_len(), 11);
        assert_eq!(cell.data(), &[0b1011_1111, 0b1110_0000]);
    }

    #[test]
    fn test_uint_overflow() {
        let mut b = CellBuilder::new();
        assert!(matches!(
            b.store_uint(256, 8),
            Err(SluiceError::BitWidthOverflow { bits: 8, .. })
        ));
        assert!(b.store_uint(0, 0).is_ok());
        assert!(b.store_uint(u128::MAX, 128).is_ok());
        assert!(b.store_uint(1, 129).is_err());
    }

    #[test]
    fn test_coins_lengths() {
        assert_eq!(coins_byte_len(0), 0);
        assert_eq!(coins_byte_len(255), 1);
        assert_eq!(coins_byte_len(256), 2);
        assert_eq!(coins_bit_len(100), 12);

        let mut b = CellBuilder::new();
        assert!(b.store_coins((1u128 << 120) - 1).is_ok());
        assert!(matches!(
            b.store_coins(1u128 << 120),
            Err(SluiceError::BitWidthOverflow { .. })
        ));
    }

    #[test]
    fn test_capacity_overflow() {
        let mut b = CellBuilder::new();
        b.store_bytes(&[0u8; 255]).unwrap();
        assert_eq!(b.remaining_bits(), 7);
        assert!(matches!(
            b.store_u8(1),
            Err(SluiceError::CellOverflow { .. })
        ));
        // failed store leaves builder untouched
        assert_eq!(b.bit_len(), 2040);
    }

    #[test]
    fn test_ref_limit() {
        let mut b = CellBuilder::new();
        let child = Arc::new(Cell::empty());
        for _ in 0..MAX_REFS {
            b.store_ref(child.clone()).unwrap();
        }
        assert!(matches!(
            b.store_maybe_ref(Some(child)),
            Err(SluiceError::TooManyRefs(_))
        ));
        assert_eq!(b.bit_len(), 0);
    }
}
