//! SLUICE channel state
//!
//! The channel state model, its merkle commitment, structural transition
//! checks, and the storage layer that persists states and transactions over
//! any `KvStore` (in-memory or sled).

pub mod channel;
pub mod store;
pub mod memory;
pub mod persistent;

pub use channel::*;
pub use store::*;
pub use memory::*;
pub use persistent::*;
