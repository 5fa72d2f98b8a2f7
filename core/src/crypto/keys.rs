// Key derivation — three symmetric keys from one 16-byte hop seed
//
// h1 = SHA-256(seed), h2 = SHA-256(h1), h3 = SHA-256(h2)
// key1 = h1[0..8], key2 = h2[0..16], key3 = h3[0..16]

use super::stream::LayerCipher;
use super::CryptoError;
use crate::cell::KeySeed;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric keys shared between the client and one hop of its circuit
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    pub key1: [u8; 8],
    pub key2: [u8; 16],
    pub key3: [u8; 16],
}

impl DerivedKeys {
    /// Key for the forward (client → exit) layer under `selector`
    pub fn forward_key(&self, selector: u8) -> Result<&[u8], CryptoError> {
        match LayerCipher::from_selector(selector)? {
            LayerCipher::Rc4 => Ok(&self.key1),
            LayerCipher::Aes128Ctr => Ok(&self.key3),
        }
    }

    /// Key for the backward (exit → client) layer under `selector`
    pub fn backward_key(&self, selector: u8) -> Result<&[u8], CryptoError> {
        LayerCipher::from_selector(selector)?;
        Ok(&self.key2)
    }
}

impl fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKeys([REDACTED])")
    }
}

/// Derive the hop keys from a seed. Pure and deterministic.
pub fn derive_keys(seed: &KeySeed) -> DerivedKeys {
    let h1 = Sha256::digest(seed);
    let h2 = Sha256::digest(h1);
    let h3 = Sha256::digest(h2);

    let mut keys = DerivedKeys {
        key1: [0u8; 8],
        key2: [0u8; 16],
        key3: [0u8; 16],
    };
    keys.key1.copy_from_slice(&h1[..8]);
    keys.key2.copy_from_slice(&h2[..16]);
    keys.key3.copy_from_slice(&h3[..16]);
    keys
}

/// Fresh seed from the OS CSPRNG
pub fn random_seed() -> KeySeed {
    let mut seed = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_keys_is_deterministic() {
        let seed = *b"16BytesKeySeed!!";
        assert_eq!(derive_keys(&seed), derive_keys(&seed));
    }

    #[test]
    fn test_derive_keys_follows_hash_chain() {
        let seed = [0x42u8; 16];
        let keys = derive_keys(&seed);

        let h1 = Sha256::digest(seed);
        let h2 = Sha256::digest(h1);
        let h3 = Sha256::digest(h2);
        assert_eq!(&keys.key1[..], &h1[..8]);
        assert_eq!(&keys.key2[..], &h2[..16]);
        assert_eq!(&keys.key3[..], &h3[..16]);
    }

    #[test]
    fn test_different_seeds_diverge() {
        let a = derive_keys(&[1u8; 16]);
        let b = derive_keys(&[2u8; 16]);
        assert_ne!(a.key1, b.key1);
        assert_ne!(a.key2, b.key2);
        assert_ne!(a.key3, b.key3);
    }

    #[test]
    fn test_key_selection_by_cipher() {
        let keys = derive_keys(&[9u8; 16]);
        assert_eq!(keys.forward_key(1).unwrap(), &keys.key1[..]);
        assert_eq!(keys.forward_key(2).unwrap(), &keys.key3[..]);
        assert_eq!(keys.backward_key(1).unwrap(), &keys.key2[..]);
        assert_eq!(keys.backward_key(2).unwrap(), &keys.key2[..]);
        assert_eq!(keys.forward_key(0), Err(CryptoError::UnsupportedCipher(0)));
    }

    #[test]
    fn test_random_seeds_differ() {
        assert_ne!(random_seed(), random_seed());
    }

    #[test]
    fn test_debug_redacts() {
        let keys = derive_keys(&[3u8; 16]);
        assert_eq!(format!("{:?}", keys), "DerivedKeys([REDACTED])");
    }
}
