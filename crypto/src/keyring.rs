//! Local key-holder backed by in-process Ed25519 keypairs

use async_trait::async_trait;
use parking_lot::RwLock;
use sluice_core::{AuthContext, KeyHolder, PublicKey, Signature, SluiceError, SluiceResult};
use std::collections::HashMap;
use tracing::debug;

use crate::keys::KeyPair;
use crate::signing::sign;

/// Key-holder holding any number of participant keypairs
#[derive(Default)]
pub struct Keyring {
    keys: RwLock<HashMap<PublicKey, KeyPair>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I: IntoIterator<Item = KeyPair>>(keys: I) -> Self {
        let ring = Self::new();
        for key in keys {
            ring.insert(key);
        }
        ring
    }

    /// Add a keypair, returning its public key
    pub fn insert(&self, keypair: KeyPair) -> PublicKey {
        let public_key = keypair.public_key();
        self.keys.write().insert(public_key, keypair);
        public_key
    }

    pub fn remove(&self, public_key: &PublicKey) -> bool {
        self.keys.write().remove(public_key).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[async_trait]
impl KeyHolder for Keyring {
    fn holds(&self, signer: &PublicKey) -> bool {
        self.keys.read().contains_key(signer)
    }

    async fn sign(&self, message: &[u8], ctx: &AuthContext) -> SluiceResult<Signature> {
        let keys = self.keys.read();
        let keypair = keys
            .get(&ctx.signer)
            .ok_or_else(|| SluiceError::UnknownSigner(ctx.signer.to_hex()))?;
        debug!("Signing for {} on {} nonce={}", ctx.signer, ctx.channel_id, ctx.nonce);
        Ok(sign(keypair, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::verify;
    use sluice_core::{ChannelId, Nonce};

    #[tokio::test]
    async fn test_keyring_signs_for_held_key() {
        let kp = KeyPair::generate();
        let ring = Keyring::with_keys([kp.clone()]);
        let ctx = AuthContext {
            channel_id: ChannelId::new(1),
            signer: kp.public_key(),
            nonce: Nonce::new(1),
        };

        assert!(ring.holds(&kp.public_key()));
        let sig = ring.sign(b"payload", &ctx).await.unwrap();
        assert!(verify(&kp.public_key(), b"payload", &sig).is_ok());
    }

    #[tokio::test]
    async fn test_keyring_rejects_unknown_signer() {
        let ring = Keyring::new();
        let ctx = AuthContext {
            channel_id: ChannelId::new(1),
            signer: KeyPair::generate().public_key(),
            nonce: Nonce::new(1),
        };

        let result = ring.sign(b"payload", &ctx).await;
        assert!(matches!(result, Err(SluiceError::UnknownSigner(_))));
    }
}
