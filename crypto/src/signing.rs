//! Ed25519 signatures over transaction signing bytes

use ed25519_dalek::{Signer, Verifier};
use sluice_core::{PublicKey, SluiceError, SluiceResult, Signature};

use crate::keys::{public_key_to_ed25519, KeyPair};

/// Sign a message using Ed25519
pub fn sign(keypair: &KeyPair, message: &[u8]) -> Signature {
    let signature = keypair.signing_key().sign(message);
    Signature::from_bytes(signature.to_bytes())
}

/// Verify with strict Ed25519 rules (no malleable or small-order signatures)
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> SluiceResult<()> {
    let verifying_key = public_key_to_ed25519(public_key)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());

    verifying_key
        .verify_strict(message, &sig)
        .map_err(|_| SluiceError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_binds_key_and_message() {
        let alice = KeyPair::from_seed(&[1; 32]);
        let bob = KeyPair::from_seed(&[2; 32]);
        let message = b"SLUICE_TX_V1:payment";

        let signature = sign(&alice, message);
        assert!(verify(&alice.public_key(), message, &signature).is_ok());
        assert!(matches!(
            verify(&bob.public_key(), message, &signature),
            Err(SluiceError::InvalidSignature)
        ));
        assert!(verify(&alice.public_key(), b"SLUICE_TX_V1:other", &signature).is_err());
    }

    #[test]
    fn test_deterministic_signatures() {
        let key = KeyPair::from_seed(&[7; 32]);
        assert_eq!(sign(&key, b"m"), sign(&key, b"m"));
    }

    #[test]
    fn test_garbage_public_key() {
        let key = KeyPair::generate();
        let signature = sign(&key, b"m");
        // arbitrary bytes, either undecodable or the wrong key
        let bogus = PublicKey::from_bytes([0xff; 32]);
        assert!(verify(&bogus, b"m", &signature).is_err());
    }
}
