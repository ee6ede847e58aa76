//! SLUICE payment channel protocol
//!
//! Implements the off-chain side of a payment channel:
//! - Layered operation codes
//! - Channel transactions and their cell encoding
//! - Transition checks (signature, proof, nonce, conservation)
//! - The lifecycle manager that applies transitions to stored state
//! - Settlement hand-off and a model of the on-ledger contract

pub mod opcode;
pub mod transaction;
pub mod codec;
pub mod validator;
pub mod manager;
pub mod settlement;
pub mod contract;

pub use opcode::*;
pub use transaction::*;
pub use codec::*;
pub use validator::*;
pub use manager::*;
pub use settlement::*;
pub use contract::*;
