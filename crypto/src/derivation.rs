//! Key derivation using HKDF

use hkdf::Hkdf;
use sluice_core::{SluiceError, SluiceResult};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::{KeyPair, SecretKey};

/// Derive a 32-byte key using HKDF-SHA256
pub fn derive_key_32(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> SluiceResult<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = [0u8; 32];

    hk.expand(info, &mut output)
        .map_err(|e| SluiceError::KeyDerivationFailed(e.to_string()))?;

    Ok(output)
}

/// Seed from which participant keys are derived
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeySeed {
    seed: [u8; 32],
}

impl KeySeed {
    /// Create from a 32-byte seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { seed }
    }

    /// Generate a random seed
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        Self { seed }
    }

    /// Stretch a passphrase into a seed
    pub fn from_phrase(phrase: &str) -> SluiceResult<Self> {
        let seed = derive_key_32(phrase.as_bytes(), Some(b"sluice-seed"), b"master")?;
        Ok(Self { seed })
    }

    /// Derive the participant keypair at `index`
    pub fn derive_keypair(&self, index: u32) -> SluiceResult<KeyPair> {
        let info = format!("sluice/participant/{}", index);
        let derived = derive_key_32(&self.seed, None, info.as_bytes())?;
        Ok(SecretKey::new(derived).to_keypair())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let key1 = derive_key_32(b"ikm", Some(b"salt"), b"info").unwrap();
        let key2 = derive_key_32(b"ikm", Some(b"salt"), b"info").unwrap();
        let key3 = derive_key_32(b"ikm", Some(b"salt"), b"other").unwrap();

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_seed_from_phrase() {
        let seed = KeySeed::from_phrase("my secret phrase").unwrap();

        let kp0 = seed.derive_keypair(0).unwrap();
        let kp1 = seed.derive_keypair(1).unwrap();
        assert_ne!(kp0.public_key(), kp1.public_key());

        // Deterministic
        let again = KeySeed::from_phrase("my secret phrase").unwrap();
        assert_eq!(kp0.public_key(), again.derive_keypair(0).unwrap().public_key());
    }
}
