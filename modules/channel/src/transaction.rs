//! Channel transaction

use serde::{Deserialize, Serialize};
use sluice_core::{
    Amount, ChannelId, Nonce, PublicKey, Signable, Signature, SluiceError, SluiceResult,
    StateRoot, Timestamp, TxId,
};
use sluice_crypto::hashing::hash_multiple;
use sluice_crypto::merkle::MerkleProof;
use sluice_crypto::signing::verify;
use std::fmt;

use crate::codec;
use crate::opcode::ChannelOp;

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Rejected,
}

impl TransactionStatus {
    pub fn as_u8(&self) -> u8 {
        match self {
            TransactionStatus::Pending => 0,
            TransactionStatus::Completed => 1,
            TransactionStatus::Failed => 2,
            TransactionStatus::Rejected => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TransactionStatus::Pending),
            1 => Some(TransactionStatus::Completed),
            2 => Some(TransactionStatus::Failed),
            3 => Some(TransactionStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Derive a transaction id from its timestamp, nonce and channel
///
/// Avoids collisions between transactions; it is not a content hash.
pub fn derive_tx_id(timestamp: Timestamp, nonce: Nonce, channel_id: ChannelId) -> TxId {
    hash_multiple(&[
        &timestamp.0.to_be_bytes(),
        &nonce.0.to_be_bytes(),
        &channel_id.0.to_be_bytes(),
    ])
}

/// A proposed state change on one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub op_code: ChannelOp,
    pub channel_id: ChannelId,
    pub from: PublicKey,
    pub to: PublicKey,
    pub amount: Amount,
    /// Must equal the channel nonce plus one
    pub nonce: Nonce,
    /// Channel nonce the transaction was built against
    pub seqno: u64,
    pub timestamp: Timestamp,
    /// Channel root the transaction was built against
    pub merkle_root: StateRoot,
    pub proof: Option<MerkleProof>,
    pub signature: Option<Signature>,
    pub status: TransactionStatus,
}

impl Transaction {
    /// Unsigned, proof-less transaction stamped with the current time
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel_id: ChannelId,
        op_code: ChannelOp,
        from: PublicKey,
        to: PublicKey,
        amount: Amount,
        nonce: Nonce,
        seqno: u64,
        merkle_root: StateRoot,
    ) -> Self {
        Self::with_timestamp(
            channel_id,
            op_code,
            from,
            to,
            amount,
            nonce,
            seqno,
            merkle_root,
            Timestamp::now(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_timestamp(
        channel_id: ChannelId,
        op_code: ChannelOp,
        from: PublicKey,
        to: PublicKey,
        amount: Amount,
        nonce: Nonce,
        seqno: u64,
        merkle_root: StateRoot,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: derive_tx_id(timestamp, nonce, channel_id),
            op_code,
            channel_id,
            from,
            to,
            amount,
            nonce,
            seqno,
            timestamp,
            merkle_root,
            proof: None,
            signature: None,
            status: TransactionStatus::Pending,
        }
    }

    pub fn with_proof(mut self, proof: MerkleProof) -> Self {
        self.proof = Some(proof);
        self
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Check the signature against `from`
    pub fn verify_signature(&self) -> SluiceResult<()> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| SluiceError::VerificationFailed("transaction is unsigned".into()))?;
        verify(&self.from, &self.signing_bytes()?, signature)
    }

    /// Serialize for the transaction store
    pub fn to_bytes(&self) -> SluiceResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SluiceResult<Self> {
        bincode::deserialize(bytes).map_err(|e| SluiceError::DeserializationError(e.to_string()))
    }
}

impl Signable for Transaction {
    fn signing_bytes(&self) -> SluiceResult<Vec<u8>> {
        codec::signing_bytes(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::Hash;
    use sluice_crypto::keys::KeyPair;
    use sluice_crypto::signing::sign;

    fn unsigned(from: &KeyPair, to: &KeyPair) -> Transaction {
        Transaction::with_timestamp(
            ChannelId::new(1),
            ChannelOp::SendMessage,
            from.public_key(),
            to.public_key(),
            Amount::new(25),
            Nonce::new(1),
            0,
            Hash::ZERO,
            Timestamp::from_millis(1_700_000_000_000),
        )
    }

    #[test]
    fn test_id_derivation() {
        let a = derive_tx_id(Timestamp::from_millis(1), Nonce::new(1), ChannelId::new(1));
        let b = derive_tx_id(Timestamp::from_millis(1), Nonce::new(2), ChannelId::new(1));
        let c = derive_tx_id(Timestamp::from_millis(1), Nonce::new(1), ChannelId::new(2));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            a,
            derive_tx_id(Timestamp::from_millis(1), Nonce::new(1), ChannelId::new(1))
        );
    }

    #[test]
    fn test_signature_verification() {
        let sender = KeyPair::generate();
        let recipient = KeyPair::generate();
        let mut tx = unsigned(&sender, &recipient);
        assert!(tx.verify_signature().is_err());

        let bytes = tx.signing_bytes().unwrap();
        tx.signature = Some(sign(&sender, &bytes));
        assert!(tx.verify_signature().is_ok());

        // status is not covered by the signature
        tx.status = TransactionStatus::Completed;
        assert!(tx.verify_signature().is_ok());

        tx.amount = Amount::new(26);
        assert!(tx.verify_signature().is_err());
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let sender = KeyPair::generate();
        let other = KeyPair::generate();
        let mut tx = unsigned(&sender, &other);
        let bytes = tx.signing_bytes().unwrap();
        tx.signature = Some(sign(&other, &bytes));
        assert!(tx.verify_signature().is_err());
    }

    #[test]
    fn test_store_bytes_roundtrip() {
        let tx = unsigned(&KeyPair::generate(), &KeyPair::generate());
        assert_eq!(Transaction::from_bytes(&tx.to_bytes().unwrap()).unwrap(), tx);
    }

    #[test]
    fn test_status_codes() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Rejected,
        ] {
            assert_eq!(TransactionStatus::from_u8(status.as_u8()), Some(status));
        }
        assert_eq!(TransactionStatus::from_u8(9), None);
    }
}
