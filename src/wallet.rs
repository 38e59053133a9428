//! Wallet key derivation
//!
//! Recovery phrase or raw key in, keypair out. Pure and offline; the engine
//! itself only ever needs the public half.

use bip39::{Language, Mnemonic, Seed};
use solana_sdk::{
    derivation_path::DerivationPath,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    signer::keypair::{keypair_from_seed, keypair_from_seed_and_derivation_path},
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroizing;

/// First account of the standard Solana wallet layout
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/501'/0'/0'";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyDerivationError {
    /// Unknown word or checksum mismatch
    #[error("{0}")]
    InvalidSeed(String),

    #[error("Invalid derivation path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

/// Derived account keypair
pub struct WalletManager {
    keypair: Arc<Keypair>,
}

impl WalletManager {
    /// Derive from a BIP-39 phrase (empty passphrase) along `path`
    pub fn derive(phrase: &str, path: &str) -> Result<Self, KeyDerivationError> {
        let normalized = Zeroizing::new(phrase.split_whitespace().collect::<Vec<_>>().join(" "));
        let mnemonic = Mnemonic::from_phrase(&normalized, Language::English)
            .map_err(|e| KeyDerivationError::InvalidSeed(e.to_string()))?;
        let seed = Seed::new(&mnemonic, "");

        let derivation_path =
            DerivationPath::from_absolute_path_str(path).map_err(|e| KeyDerivationError::InvalidPath {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        let keypair = keypair_from_seed_and_derivation_path(seed.as_bytes(), Some(derivation_path))
            .map_err(|e| KeyDerivationError::InvalidKey(e.to_string()))?;

        Ok(Self::from_keypair(keypair))
    }

    /// From a 32-byte ed25519 secret or a 64-byte secret+public keypair
    pub fn from_raw_key(bytes: &[u8]) -> Result<Self, KeyDerivationError> {
        if bytes.iter().all(|&b| b == 0) {
            return Err(KeyDerivationError::InvalidKey("all-zero key rejected".to_string()));
        }

        let keypair = match bytes.len() {
            32 => keypair_from_seed(bytes).map_err(|e| KeyDerivationError::InvalidKey(e.to_string()))?,
            64 => Keypair::try_from(bytes).map_err(|e| KeyDerivationError::InvalidKey(e.to_string()))?,
            n => {
                return Err(KeyDerivationError::InvalidKey(format!(
                    "expected 32 or 64 bytes, got {}",
                    n
                )))
            }
        };
        Ok(Self::from_keypair(keypair))
    }

    /// Load a keypair file: raw 64 bytes or the JSON byte-array format
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KeyDerivationError> {
        let path = path.as_ref();
        let contents = Zeroizing::new(std::fs::read(path).map_err(|e| {
            KeyDerivationError::InvalidKey(format!("failed to read {}: {}", path.display(), e))
        })?);

        if contents.len() == 64 {
            return Self::from_raw_key(&contents);
        }

        let bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
            serde_json::from_slice(&contents)
                .map_err(|e| KeyDerivationError::InvalidKey(format!("failed to parse keypair JSON: {}", e)))?,
        );
        Self::from_raw_key(&bytes)
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// On-chain identity of the account
    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

impl Clone for WalletManager {
    fn clone(&self) -> Self {
        Self {
            keypair: Arc::clone(&self.keypair),
        }
    }
}

impl std::fmt::Debug for WalletManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletManager").field("pubkey", &self.pubkey()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_derive_is_deterministic() {
        let a = WalletManager::derive(PHRASE, DEFAULT_DERIVATION_PATH).unwrap();
        let b = WalletManager::derive(&format!("  {}\n", PHRASE), DEFAULT_DERIVATION_PATH).unwrap();
        assert_eq!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn test_derive_path_selects_account() {
        let first = WalletManager::derive(PHRASE, "m/44'/501'/0'/0'").unwrap();
        let second = WalletManager::derive(PHRASE, "m/44'/501'/1'/0'").unwrap();
        assert_ne!(first.pubkey(), second.pubkey());
    }

    #[test]
    fn test_derive_rejects_bad_checksum() {
        let phrase = "abandon ".repeat(12);
        assert!(matches!(
            WalletManager::derive(&phrase, DEFAULT_DERIVATION_PATH),
            Err(KeyDerivationError::InvalidSeed(_))
        ));
        assert!(matches!(
            WalletManager::derive("not a real recovery phrase at all", DEFAULT_DERIVATION_PATH),
            Err(KeyDerivationError::InvalidSeed(_))
        ));
    }

    #[test]
    fn test_derive_rejects_bad_path() {
        assert!(matches!(
            WalletManager::derive(PHRASE, "m/banana"),
            Err(KeyDerivationError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_from_raw_key_lengths() {
        let keypair = Keypair::new();
        let full = WalletManager::from_raw_key(&keypair.to_bytes()).unwrap();
        assert_eq!(full.pubkey(), keypair.pubkey());

        let secret_only = WalletManager::from_raw_key(&keypair.to_bytes()[..32]).unwrap();
        assert_eq!(secret_only.pubkey(), keypair.pubkey());

        assert!(WalletManager::from_raw_key(&[7u8; 31]).is_err());
        assert!(WalletManager::from_raw_key(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_from_file_json() {
        let keypair = Keypair::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap()).unwrap();

        let wallet = WalletManager::from_file(file.path()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
    }
}
