//! SLUICE operator CLI library

pub mod commands;
pub mod wallet;

pub use commands::*;
pub use wallet::*;
