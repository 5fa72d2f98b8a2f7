// Cryptography module — per-hop key derivation, header sealing, layer ciphers

pub mod header;
pub mod keys;
pub mod stream;

use thiserror::Error;

pub use header::{HeaderOpen, HeaderScheme, HeaderSeal, RelayIdentity, RelayPublicKey};
pub use keys::{derive_keys, random_seed, DerivedKeys};
pub use stream::{decrypt_layer, encrypt_layer, LayerCipher};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),
    #[error("Encryption failed: {0}")]
    EncryptionFailure(String),
    #[error("Unsupported cipher selector {0}")]
    UnsupportedCipher(u8),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
}
