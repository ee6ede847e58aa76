//! Error types for SLUICE

use thiserror::Error;

use crate::types::Amount;

/// Broad failure classes, used to decide how a failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed proof, cell or encoding. Never retried.
    Structural,
    /// Nonce, balance or status rule broken. Transaction is rejected.
    InvariantViolation,
    /// Signature or proof check returned a negative answer.
    VerificationFailure,
    /// Unknown channel or transaction.
    NotFound,
    /// Ledger or storage collaborator failure. Eligible for retry.
    Transport,
    /// Configuration or programming error.
    Internal,
}

/// Main error type for SLUICE
#[derive(Error, Debug)]
pub enum SluiceError {
    // ============ Cryptography Errors ============
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("No signing key held for {0}")]
    UnknownSigner(String),

    // ============ Merkle Proof Errors ============
    #[error("Malformed merkle proof: {0}")]
    MerkleStructure(String),

    #[error("Malformed merkle proof encoding: {0}")]
    MerkleEncoding(String),

    // ============ OpCode Errors ============
    #[error("Invalid op code {value:#x} for {layer} layer")]
    InvalidOpCode { layer: String, value: u32 },

    // ============ Cell Errors ============
    #[error("Root cell missing")]
    RootCellMissing,

    #[error("Invalid cell reference: {0}")]
    InvalidReference(String),

    #[error("Value does not fit in {bits} bits: {field}")]
    BitWidthOverflow { field: String, bits: usize },

    #[error("Cell overflow: {required} bits exceed capacity {capacity}")]
    CellOverflow { required: usize, capacity: usize },

    #[error("Cell holds too many references (max {0})")]
    TooManyRefs(usize),

    #[error("Cell underflow: requested {requested} bits, {remaining} remaining")]
    CellUnderflow { requested: usize, remaining: usize },

    #[error("Cell body width mismatch: expected {expected} bits, found {found}")]
    BitWidthMismatch { expected: usize, found: usize },

    #[error("Malformed cell data: {0}")]
    MalformedCell(String),

    // ============ Transition Errors ============
    #[error("Invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("Invalid seqno: expected {expected}, got {got}")]
    InvalidSeqno { expected: u64, got: u64 },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Amount, available: Amount },

    #[error("Balance not conserved: before {before}, after {after}")]
    BalanceNotConserved { before: Amount, after: Amount },

    #[error("Status mismatch: operation requires {expected}, channel is {actual}")]
    StatusMismatch { expected: String, actual: String },

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("Invalid channel state: {0}")]
    InvalidState(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    // ============ Lookup Errors ============
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Channel already exists: {0}")]
    ChannelExists(String),

    // ============ Collaborator Errors ============
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("Message serialization failed: {0}")]
    SerializationError(String),

    #[error("Message deserialization failed: {0}")]
    DeserializationError(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ============ General Errors ============
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SluiceError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        use SluiceError::*;
        match self {
            MerkleStructure(_)
            | MerkleEncoding(_)
            | InvalidOpCode { .. }
            | RootCellMissing
            | InvalidReference(_)
            | BitWidthOverflow { .. }
            | CellOverflow { .. }
            | TooManyRefs(_)
            | CellUnderflow { .. }
            | BitWidthMismatch { .. }
            | MalformedCell(_)
            | DeserializationError(_)
            | SerializationError(_) => ErrorKind::Structural,

            InvalidNonce { .. }
            | InvalidSeqno { .. }
            | InsufficientBalance { .. }
            | BalanceNotConserved { .. }
            | StatusMismatch { .. }
            | UnknownParticipant(_)
            | InvalidState(_)
            | InvalidTransaction(_)
            | ChannelExists(_) => ErrorKind::InvariantViolation,

            InvalidSignature | InvalidPublicKey | VerificationFailed(_) => {
                ErrorKind::VerificationFailure
            }

            ChannelNotFound(_) | TransactionNotFound(_) => ErrorKind::NotFound,

            StorageError(_) | LedgerError(_) => ErrorKind::Transport,

            InvalidPrivateKey
            | KeyDerivationFailed(_)
            | UnknownSigner(_)
            | ConfigError(_)
            | Internal(_)
            | Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

impl From<std::io::Error> for SluiceError {
    fn from(err: std::io::Error) -> Self {
        SluiceError::StorageError(err.to_string())
    }
}

impl From<bincode::Error> for SluiceError {
    fn from(err: bincode::Error) -> Self {
        SluiceError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for SluiceError {
    fn from(err: serde_json::Error) -> Self {
        SluiceError::SerializationError(err.to_string())
    }
}

impl From<hex::FromHexError> for SluiceError {
    fn from(err: hex::FromHexError) -> Self {
        SluiceError::DeserializationError(err.to_string())
    }
}
