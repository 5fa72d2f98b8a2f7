// Layer ciphers — the symmetric encryption each hop adds or removes
//
// Selector 1: RC4, no framing (keystream XOR)
// Selector 2: AES-128-CTR, output = iv(16) || ciphertext

use super::CryptoError;
use aes::Aes128;
use ctr::cipher::consts::{U16, U8};
use ctr::cipher::{KeyInit, KeyIvInit, StreamCipher};
use rand::RngCore;
use rc4::Rc4;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

const AES_IV_SIZE: usize = 16;

/// Cipher named by a header's cipher selector byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LayerCipher {
    Rc4 = 1,
    Aes128Ctr = 2,
}

impl LayerCipher {
    pub fn from_selector(selector: u8) -> Result<Self, CryptoError> {
        match selector {
            1 => Ok(LayerCipher::Rc4),
            2 => Ok(LayerCipher::Aes128Ctr),
            other => Err(CryptoError::UnsupportedCipher(other)),
        }
    }

    pub fn selector(self) -> u8 {
        self as u8
    }
}

fn rc4_apply(key: &[u8], data: &mut [u8]) -> Result<(), CryptoError> {
    // rc4 is generic over key length; only the two lengths derive_keys yields are wired
    match key.len() {
        8 => {
            let mut cipher = Rc4::<U8>::new_from_slice(key)
                .map_err(|e| CryptoError::EncryptionFailure(e.to_string()))?;
            cipher.apply_keystream(data);
        }
        16 => {
            let mut cipher = Rc4::<U16>::new_from_slice(key)
                .map_err(|e| CryptoError::EncryptionFailure(e.to_string()))?;
            cipher.apply_keystream(data);
        }
        other => {
            return Err(CryptoError::EncryptionFailure(format!(
                "unsupported RC4 key length {}",
                other
            )))
        }
    }
    Ok(())
}

/// Add one layer of encryption
pub fn encrypt_layer(selector: u8, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match LayerCipher::from_selector(selector)? {
        LayerCipher::Rc4 => {
            let mut out = plaintext.to_vec();
            rc4_apply(key, &mut out)?;
            Ok(out)
        }
        LayerCipher::Aes128Ctr => {
            let mut iv = [0u8; AES_IV_SIZE];
            rand::rngs::OsRng.fill_bytes(&mut iv);

            let mut cipher = Aes128Ctr::new_from_slices(key, &iv)
                .map_err(|e| CryptoError::EncryptionFailure(e.to_string()))?;

            let mut out = Vec::with_capacity(AES_IV_SIZE + plaintext.len());
            out.extend_from_slice(&iv);
            out.extend_from_slice(plaintext);
            cipher.apply_keystream(&mut out[AES_IV_SIZE..]);
            Ok(out)
        }
    }
}

/// Remove one layer of encryption
pub fn decrypt_layer(selector: u8, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match LayerCipher::from_selector(selector)? {
        LayerCipher::Rc4 => {
            let mut out = ciphertext.to_vec();
            rc4_apply(key, &mut out).map_err(|e| CryptoError::DecryptionFailure(e.to_string()))?;
            Ok(out)
        }
        LayerCipher::Aes128Ctr => {
            if ciphertext.len() < AES_IV_SIZE {
                return Err(CryptoError::DecryptionFailure(format!(
                    "ciphertext shorter than IV ({} bytes)",
                    ciphertext.len()
                )));
            }
            let (iv, body) = ciphertext.split_at(AES_IV_SIZE);
            let mut cipher = Aes128Ctr::new_from_slices(key, iv)
                .map_err(|e| CryptoError::DecryptionFailure(e.to_string()))?;

            let mut out = body.to_vec();
            cipher.apply_keystream(&mut out);
            Ok(out)
        }
    }
}
