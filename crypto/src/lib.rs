//! SLUICE Cryptography Module
//! 
//! Provides cryptographic primitives using standard, audited algorithms:
//! - Ed25519 for signatures
//! - SHA-256 for merkle commitments and cell hashes
//! - BLAKE3 for transaction identifiers
//! - HKDF for key derivation

pub mod keys;
pub mod keyring;
pub mod signing;
pub mod hashing;
pub mod derivation;
pub mod merkle;

pub use keys::*;
pub use keyring::*;
pub use signing::*;
pub use hashing::*;
pub use derivation::*;
pub use merkle::*;
