//! Participant key files

use serde::{Deserialize, Serialize};
use sluice_core::{PublicKey, SluiceError, SluiceResult, Timestamp};
use sluice_crypto::derivation::KeySeed;
use sluice_crypto::keyring::Keyring;
use sluice_crypto::keys::{KeyFile, KeyPair};
use std::path::{Path, PathBuf};

/// On-disk wallet format
#[derive(Serialize, Deserialize)]
pub struct WalletFile {
    pub version: u32,
    pub name: String,
    pub created_at: u64,
    #[serde(flatten)]
    pub key: KeyFile,
}

/// A named participant key
pub struct Wallet {
    name: String,
    keypair: KeyPair,
}

impl Wallet {
    pub fn new(name: &str) -> Self {
        Self::from_keypair(name, KeyPair::generate())
    }

    pub fn from_keypair(name: &str, keypair: KeyPair) -> Self {
        Self {
            name: name.to_string(),
            keypair,
        }
    }

    /// Deterministic key from a passphrase and derivation index
    pub fn from_phrase(name: &str, phrase: &str, index: u32) -> SluiceResult<Self> {
        let keypair = KeySeed::from_phrase(phrase)?.derive_keypair(index)?;
        Ok(Self::from_keypair(name, keypair))
    }

    pub fn load(path: &Path) -> SluiceResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: WalletFile = serde_json::from_str(&content)?;
        Ok(Self {
            keypair: file.key.to_keypair()?,
            name: file.name,
        })
    }

    pub fn save(&self, path: &Path) -> SluiceResult<()> {
        let file = WalletFile {
            version: 1,
            name: self.name.clone(),
            created_at: Timestamp::now().as_millis(),
            key: KeyFile::from(&self.keypair),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }
}

/// Wallet directory under the data dir
pub struct WalletManager {
    wallets_dir: PathBuf,
}

impl WalletManager {
    pub fn new(wallets_dir: PathBuf) -> Self {
        Self { wallets_dir }
    }

    pub fn init(&self) -> SluiceResult<()> {
        std::fs::create_dir_all(&self.wallets_dir)?;
        Ok(())
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.wallets_dir.join(format!("{}.json", name))
    }

    /// Store a new wallet; existing names are never overwritten
    pub fn store(&self, wallet: &Wallet) -> SluiceResult<()> {
        self.init()?;
        let path = self.path_of(wallet.name());
        if path.exists() {
            return Err(SluiceError::ConfigError(format!(
                "wallet '{}' already exists",
                wallet.name()
            )));
        }
        wallet.save(&path)
    }

    pub fn get(&self, name: &str) -> SluiceResult<Wallet> {
        let path = self.path_of(name);
        if !path.exists() {
            return Err(SluiceError::ConfigError(format!(
                "wallet '{}' not found",
                name
            )));
        }
        Wallet::load(&path)
    }

    /// All readable wallets, sorted by name
    pub fn list(&self) -> SluiceResult<Vec<Wallet>> {
        self.init()?;
        let mut wallets = Vec::new();
        for entry in std::fs::read_dir(&self.wallets_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match Wallet::load(&path) {
                    Ok(wallet) => wallets.push(wallet),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable wallet"),
                }
            }
        }
        wallets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(wallets)
    }

    /// Key-holder over every stored wallet
    pub fn keyring(&self) -> SluiceResult<Keyring> {
        Ok(Keyring::with_keys(
            self.list()?.into_iter().map(|w| w.keypair),
        ))
    }

    /// Accept a wallet name or a hex public key
    pub fn resolve(&self, name_or_key: &str) -> SluiceResult<PublicKey> {
        if self.path_of(name_or_key).exists() {
            return Ok(self.get(name_or_key)?.public_key());
        }
        PublicKey::from_hex(name_or_key).map_err(|_| {
            SluiceError::ConfigError(format!(
                "'{}' is neither a wallet nor a public key",
                name_or_key
            ))
        })
    }
}
