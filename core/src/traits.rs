//! Core traits defining SLUICE interfaces
//!
//! These traits define the contracts for the collaborators the channel core
//! consumes: storage, key-holder and ledger client.

use crate::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for SLUICE operations
pub type SluiceResult<T> = Result<T, crate::error::SluiceError>;

/// Trait for signable types
pub trait Signable {
    /// Get the canonical bytes to be signed
    fn signing_bytes(&self) -> SluiceResult<Vec<u8>>;
}

/// Key-value storage collaborator
///
/// Stores serialized channel states and transactions. Implementations must make
/// a single `put` atomic.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value by key
    async fn get(&self, key: &[u8]) -> SluiceResult<Option<Vec<u8>>>;

    /// Set a value
    async fn put(&self, key: &[u8], value: &[u8]) -> SluiceResult<()>;

    /// Replace `key` only if its current value equals `expected`
    /// (`None` meaning absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> SluiceResult<bool>;

    /// All entries whose key starts with `prefix`, in key order
    async fn scan_prefix(&self, prefix: &[u8]) -> SluiceResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Authorization context handed to the key-holder with each signing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub channel_id: ChannelId,
    pub signer: PublicKey,
    pub nonce: Nonce,
}

/// Key-holder collaborator (wallet)
#[async_trait]
pub trait KeyHolder: Send + Sync {
    /// Whether this key-holder can sign for `signer`
    fn holds(&self, signer: &PublicKey) -> bool;

    /// Sign the canonical transaction bytes on behalf of `ctx.signer`
    async fn sign(&self, message: &[u8], ctx: &AuthContext) -> SluiceResult<Signature>;
}

/// Receipt returned by the ledger on submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub id: String,
    pub destination: String,
    pub submitted_at: Timestamp,
}

/// Settlement status as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStatus {
    Pending,
    Confirmed,
    Rejected(String),
}

/// Ledger client collaborator; treated as opaque I/O
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a serialized bag of cells to `destination`
    async fn submit(&self, boc: &[u8], destination: &str) -> SluiceResult<SubmissionReceipt>;

    /// Query the status of an earlier submission
    async fn status(&self, receipt: &SubmissionReceipt) -> SluiceResult<SettlementStatus>;
}
