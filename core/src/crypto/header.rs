// Header sealing — asymmetric encryption of the 32-byte cell header
//
// Two schemes, chosen per relay and advertised by a tag byte on its public key:
//
//   1 = RSA-OAEP(SHA-256)     sealed length = modulus size
//   2 = X25519 + XChaCha20-Poly1305
//       ephemeral_pk(32) || nonce(24) || ciphertext(32) || tag(16)
//
// The wire message a relay receives is sealed_header || payload, so the relay
// must know its own sealed length to split the two.

use super::CryptoError;
use crate::cell::HEADER_SIZE;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

/// KDF context for the X25519 header key. Changing this breaks every relay.
const HEADER_KDF_CONTEXT: &str = "onionrelay v1 header seal";

const SCHEME_RSA: u8 = 1;
const SCHEME_X25519: u8 = 2;

const X25519_SEALED_LEN: usize = 32 + 24 + HEADER_SIZE + 16;

/// Default RSA modulus size for freshly generated relay identities
pub const DEFAULT_RSA_BITS: usize = 2048;

/// Encrypts a header for one relay
pub trait HeaderSeal {
    /// Length of the sealed header this key produces
    fn sealed_len(&self) -> usize;
    fn seal(&self, header: &[u8; HEADER_SIZE]) -> Result<Vec<u8>, CryptoError>;
}

/// Decrypts headers addressed to this relay
pub trait HeaderOpen {
    /// Length of the sealed header prefix on inbound messages
    fn sealed_len(&self) -> usize;
    fn open(&self, sealed: &[u8]) -> Result<[u8; HEADER_SIZE], CryptoError>;
}

/// Header sealing scheme
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderScheme {
    #[default]
    Rsa,
    X25519,
}

impl FromStr for HeaderScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" => Ok(HeaderScheme::Rsa),
            "x25519" => Ok(HeaderScheme::X25519),
            other => Err(format!("unknown header scheme '{}'", other)),
        }
    }
}

impl fmt::Display for HeaderScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderScheme::Rsa => write!(f, "rsa"),
            HeaderScheme::X25519 => write!(f, "x25519"),
        }
    }
}

/// A relay's advertised public key
#[derive(Clone, PartialEq)]
pub enum RelayPublicKey {
    Rsa(RsaPublicKey),
    X25519(X25519PublicKey),
}

impl RelayPublicKey {
    pub fn scheme(&self) -> HeaderScheme {
        match self {
            RelayPublicKey::Rsa(_) => HeaderScheme::Rsa,
            RelayPublicKey::X25519(_) => HeaderScheme::X25519,
        }
    }

    /// Tagged encoding: scheme byte followed by SPKI DER (RSA) or the raw point (X25519)
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        match self {
            RelayPublicKey::Rsa(key) => {
                let der = key
                    .to_public_key_der()
                    .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
                let mut out = Vec::with_capacity(1 + der.as_bytes().len());
                out.push(SCHEME_RSA);
                out.extend_from_slice(der.as_bytes());
                Ok(out)
            }
            RelayPublicKey::X25519(key) => {
                let mut out = Vec::with_capacity(33);
                out.push(SCHEME_X25519);
                out.extend_from_slice(key.as_bytes());
                Ok(out)
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| CryptoError::InvalidPublicKey("empty key".to_string()))?;

        match *tag {
            SCHEME_RSA => RsaPublicKey::from_public_key_der(body)
                .map(RelayPublicKey::Rsa)
                .map_err(|e| CryptoError::InvalidPublicKey(e.to_string())),
            SCHEME_X25519 => {
                let raw: [u8; 32] = body.try_into().map_err(|_| {
                    CryptoError::InvalidPublicKey(format!(
                        "X25519 key must be 32 bytes, got {}",
                        body.len()
                    ))
                })?;
                Ok(RelayPublicKey::X25519(X25519PublicKey::from(raw)))
            }
            other => Err(CryptoError::InvalidPublicKey(format!(
                "unknown key scheme tag {}",
                other
            ))),
        }
    }
}

impl fmt::Debug for RelayPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayPublicKey::Rsa(key) => write!(f, "RelayPublicKey::Rsa({} bits)", key.size() * 8),
            RelayPublicKey::X25519(key) => {
                write!(f, "RelayPublicKey::X25519({})", hex::encode(&key.as_bytes()[..8]))
            }
        }
    }
}

fn header_key(shared_secret: &[u8]) -> [u8; 32] {
    blake3::derive_key(HEADER_KDF_CONTEXT, shared_secret)
}

impl HeaderSeal for RelayPublicKey {
    fn sealed_len(&self) -> usize {
        match self {
            RelayPublicKey::Rsa(key) => key.size(),
            RelayPublicKey::X25519(_) => X25519_SEALED_LEN,
        }
    }

    fn seal(&self, header: &[u8; HEADER_SIZE]) -> Result<Vec<u8>, CryptoError> {
        match self {
            RelayPublicKey::Rsa(key) => key
                .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), header)
                .map_err(|e| CryptoError::EncryptionFailure(e.to_string())),
            RelayPublicKey::X25519(recipient) => {
                let ephemeral_secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
                let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
                let shared_secret = ephemeral_secret.diffie_hellman(recipient);

                let mut key = header_key(shared_secret.as_bytes());
                let mut nonce_bytes = [0u8; 24];
                rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

                let cipher = XChaCha20Poly1305::new_from_slice(&key)
                    .map_err(|e| CryptoError::EncryptionFailure(e.to_string()));
                key.zeroize();
                let ciphertext = cipher?
                    .encrypt(
                        XNonce::from_slice(&nonce_bytes),
                        Payload {
                            msg: header,
                            aad: ephemeral_public.as_bytes(),
                        },
                    )
                    .map_err(|e| CryptoError::EncryptionFailure(e.to_string()))?;

                let mut out = Vec::with_capacity(X25519_SEALED_LEN);
                out.extend_from_slice(ephemeral_public.as_bytes());
                out.extend_from_slice(&nonce_bytes);
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
        }
    }
}

enum IdentitySecret {
    Rsa(Box<RsaPrivateKey>),
    X25519(StaticSecret),
}

/// A relay's long-lived keypair
pub struct RelayIdentity {
    secret: IdentitySecret,
    public: RelayPublicKey,
}

impl RelayIdentity {
    pub fn generate(scheme: HeaderScheme) -> Result<Self, CryptoError> {
        match scheme {
            HeaderScheme::Rsa => Self::generate_rsa(DEFAULT_RSA_BITS),
            HeaderScheme::X25519 => Ok(Self::generate_x25519()),
        }
    }

    pub fn generate_rsa(bits: usize) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
            .map_err(|e| CryptoError::EncryptionFailure(format!("RSA keygen: {}", e)))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self {
            secret: IdentitySecret::Rsa(Box::new(private)),
            public: RelayPublicKey::Rsa(public),
        })
    }

    pub fn generate_x25519() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = X25519PublicKey::from(&secret);
        Self {
            secret: IdentitySecret::X25519(secret),
            public: RelayPublicKey::X25519(public),
        }
    }

    pub fn public_key(&self) -> &RelayPublicKey {
        &self.public
    }

    pub fn scheme(&self) -> HeaderScheme {
        self.public.scheme()
    }
}

impl fmt::Debug for RelayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayIdentity")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl HeaderOpen for RelayIdentity {
    fn sealed_len(&self) -> usize {
        self.public.sealed_len()
    }

    fn open(&self, sealed: &[u8]) -> Result<[u8; HEADER_SIZE], CryptoError> {
        if sealed.len() != self.sealed_len() {
            return Err(CryptoError::DecryptionFailure(format!(
                "sealed header must be {} bytes, got {}",
                self.sealed_len(),
                sealed.len()
            )));
        }

        let mut plain = match &self.secret {
            IdentitySecret::Rsa(private) => private
                .decrypt(Oaep::new::<Sha256>(), sealed)
                .map_err(|e| CryptoError::DecryptionFailure(e.to_string()))?,
            IdentitySecret::X25519(secret) => {
                let mut ephemeral = [0u8; 32];
                ephemeral.copy_from_slice(&sealed[..32]);
                let ephemeral_public = X25519PublicKey::from(ephemeral);
                let nonce = XNonce::from_slice(&sealed[32..56]);

                let shared_secret = secret.diffie_hellman(&ephemeral_public);
                let mut key = header_key(shared_secret.as_bytes());
                let cipher = XChaCha20Poly1305::new_from_slice(&key)
                    .map_err(|e| CryptoError::DecryptionFailure(e.to_string()));
                key.zeroize();

                cipher?
                    .decrypt(
                        nonce,
                        Payload {
                            msg: &sealed[56..],
                            aad: &ephemeral,
                        },
                    )
                    .map_err(|_| {
                        CryptoError::DecryptionFailure("header authentication failed".to_string())
                    })?
            }
        };

        if plain.len() != HEADER_SIZE {
            plain.zeroize();
            return Err(CryptoError::DecryptionFailure(format!(
                "opened header is {} bytes",
                plain.len()
            )));
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&plain);
        plain.zeroize();
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        for (i, b) in header.iter_mut().enumerate() {
            *b = i as u8;
        }
        header
    }

    #[test]
    fn test_x25519_seal_open() {
        let identity = RelayIdentity::generate_x25519();
        let sealed = identity.public_key().seal(&sample_header()).unwrap();

        assert_eq!(sealed.len(), X25519_SEALED_LEN);
        assert_eq!(identity.sealed_len(), X25519_SEALED_LEN);
        assert_eq!(identity.open(&sealed).unwrap(), sample_header());
    }

    #[test]
    fn test_rsa_seal_open() {
        let identity = RelayIdentity::generate_rsa(1024).unwrap();
        let sealed = identity.public_key().seal(&sample_header()).unwrap();

        assert_eq!(sealed.len(), 128);
        assert_eq!(identity.open(&sealed).unwrap(), sample_header());
    }

    #[test]
    fn test_open_with_wrong_identity_fails() {
        let alice = RelayIdentity::generate_x25519();
        let bob = RelayIdentity::generate_x25519();
        let sealed = alice.public_key().seal(&sample_header()).unwrap();

        assert!(matches!(
            bob.open(&sealed),
            Err(CryptoError::DecryptionFailure(_))
        ));
    }

    #[test]
    fn test_tampered_header_rejected() {
        let identity = RelayIdentity::generate_x25519();
        let mut sealed = identity.public_key().seal(&sample_header()).unwrap();
        sealed[60] ^= 0x01;
        assert!(identity.open(&sealed).is_err());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let identity = RelayIdentity::generate_x25519();
        assert!(identity.open(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_public_key_bytes_roundtrip() {
        let x = RelayIdentity::generate_x25519();
        let bytes = x.public_key().to_bytes().unwrap();
        assert_eq!(bytes[0], SCHEME_X25519);
        assert_eq!(bytes.len(), 33);
        assert_eq!(&RelayPublicKey::from_bytes(&bytes).unwrap(), x.public_key());

        let r = RelayIdentity::generate_rsa(1024).unwrap();
        let bytes = r.public_key().to_bytes().unwrap();
        assert_eq!(bytes[0], SCHEME_RSA);
        assert_eq!(&RelayPublicKey::from_bytes(&bytes).unwrap(), r.public_key());
    }

    #[test]
    fn test_public_key_from_bad_bytes() {
        assert!(RelayPublicKey::from_bytes(&[]).is_err());
        assert!(RelayPublicKey::from_bytes(&[9, 1, 2]).is_err());
        assert!(RelayPublicKey::from_bytes(&[SCHEME_X25519, 1, 2]).is_err());
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!("RSA".parse::<HeaderScheme>().unwrap(), HeaderScheme::Rsa);
        assert_eq!("x25519".parse::<HeaderScheme>().unwrap(), HeaderScheme::X25519);
        assert!("ed448".parse::<HeaderScheme>().is_err());
    }
}
