//! SLUICE Core Library
//! 
//! Core types, traits, and abstractions for the SLUICE off-chain payment-channel protocol.
//! This crate provides the foundation for all other SLUICE components.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
