//! SLUICE Cell Format
//! 
//! Bounded bit bodies linked by references, hashed as a tree:
//! - `Cell` with cached depth and content hash
//! - `CellBuilder` / `CellSlice` for writing and reading fields
//! - Bag-of-cells serialization for storage and ledger submission

pub mod cell;
pub mod builder;
pub mod slice;
pub mod boc;

pub use cell::*;
pub use builder::*;
pub use slice::*;
pub use boc::*;
