// Relay descriptor — the JSON record a relay publishes about itself

use crate::crypto::{CryptoError, RelayPublicKey};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::net::SocketAddrV4;

use super::DirectoryError;

/// `{"address": "ip:port", "public_key": "<base64>", "load": n}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    pub address: String,
    /// Scheme-tagged public key bytes, base64 in JSON
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    pub public_key: Vec<u8>,
    /// Number of circuits the relay currently carries
    pub load: i64,
}

impl RelayDescriptor {
    pub fn new(
        address: SocketAddrV4,
        public_key: &RelayPublicKey,
        load: i64,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            address: address.to_string(),
            public_key: public_key.to_bytes()?,
            load,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddrV4, DirectoryError> {
        self.address.parse().map_err(|_| {
            DirectoryError::InvalidDescriptor(format!("bad relay address '{}'", self.address))
        })
    }

    pub fn relay_public_key(&self) -> Result<RelayPublicKey, CryptoError> {
        RelayPublicKey::from_bytes(&self.public_key)
    }
}

fn to_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}
