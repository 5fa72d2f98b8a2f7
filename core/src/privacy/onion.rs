// Layered message builder — client-side onion construction
//
// Messages are built exit-first. Every hop receives
//
//     seal(header_i, pk_i) || payload_i
//
// where header_i names hop i+1 (or the application server for the exit) and
// payload_i is the complete message for hop i+1. For Data cells payload_i is
// additionally encrypted under hop i's forward key, so each relay peels exactly
// one layer. Replies travel back with one backward layer per hop, which the
// client strips entry-first.

use crate::cell::{encode_cell, split_header, CellError, KeySeed, OnionCell, RequestType};
use crate::crypto::{
    decrypt_layer, derive_keys, encrypt_layer, random_seed, CryptoError, DerivedKeys, HeaderSeal,
    LayerCipher, RelayPublicKey,
};
use crate::directory::{DirectoryError, RelayDescriptor};
use crate::privacy::circuit::{Route, ROUTE_LENGTH};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddrV4;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OnionError {
    #[error(transparent)]
    Cell(#[from] CellError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("Invalid hop: {0}")]
    InvalidHop(String),
    #[error("Invalid circuit parameters: {0}")]
    InvalidParams(String),
}

impl From<DirectoryError> for OnionError {
    fn from(e: DirectoryError) -> Self {
        OnionError::InvalidHop(e.to_string())
    }
}

/// Cipher selectors and lifetime shared by every hop of a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitParams {
    pub backward_cipher: u8,
    pub forward_cipher: u8,
    /// Idle lifetime in seconds; each Data cell restarts it
    pub expiration: u32,
}

impl Default for CircuitParams {
    fn default() -> Self {
        Self {
            backward_cipher: LayerCipher::Rc4.selector(),
            forward_cipher: LayerCipher::Rc4.selector(),
            expiration: 60,
        }
    }
}

impl CircuitParams {
    pub fn validate(&self) -> Result<(), OnionError> {
        LayerCipher::from_selector(self.backward_cipher)?;
        LayerCipher::from_selector(self.forward_cipher)?;
        if self.expiration == 0 {
            return Err(OnionError::InvalidParams(
                "expiration must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// One hop as the client sees it
#[derive(Clone)]
pub struct CircuitHop {
    pub address: SocketAddrV4,
    pub public_key: RelayPublicKey,
    pub seed: KeySeed,
    pub keys: DerivedKeys,
}

impl CircuitHop {
    pub fn new(descriptor: &RelayDescriptor, seed: KeySeed) -> Result<Self, OnionError> {
        Ok(Self {
            address: descriptor.socket_addr()?,
            public_key: descriptor.relay_public_key()?,
            seed,
            keys: derive_keys(&seed),
        })
    }
}

impl fmt::Debug for CircuitHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitHop")
            .field("address", &self.address)
            .field("scheme", &self.public_key.scheme())
            .finish_non_exhaustive()
    }
}

/// Everything the client keeps about a live circuit
#[derive(Debug, Clone)]
pub struct CircuitHandle {
    pub circuit_id: u16,
    /// Entry first, exit last
    pub hops: Vec<CircuitHop>,
    /// Application server the exit talks to
    pub destination: SocketAddrV4,
    pub params: CircuitParams,
}

impl CircuitHandle {
    /// Fresh per-hop seeds from the OS CSPRNG
    pub fn new(
        circuit_id: u16,
        route: &Route,
        destination: SocketAddrV4,
        params: CircuitParams,
    ) -> Result<Self, OnionError> {
        let seeds = [random_seed(), random_seed(), random_seed()];
        Self::with_seeds(circuit_id, route, destination, params, seeds)
    }

    pub fn with_seeds(
        circuit_id: u16,
        route: &Route,
        destination: SocketAddrV4,
        params: CircuitParams,
        seeds: [KeySeed; ROUTE_LENGTH],
    ) -> Result<Self, OnionError> {
        params.validate()?;
        let hops = route
            .hops()
            .iter()
            .zip(seeds)
            .map(|(descriptor, seed)| CircuitHop::new(descriptor, seed))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            circuit_id,
            hops,
            destination,
            params,
        })
    }

    /// Address the built messages are sent to
    pub fn entry_address(&self) -> Result<SocketAddrV4, OnionError> {
        self.hops
            .first()
            .map(|hop| hop.address)
            .ok_or_else(|| OnionError::InvalidHop("circuit has no hops".to_string()))
    }

    fn next_address(&self, index: usize) -> SocketAddrV4 {
        self.hops
            .get(index + 1)
            .map(|hop| hop.address)
            .unwrap_or(self.destination)
    }

    fn is_exit(&self, index: usize) -> bool {
        index + 1 == self.hops.len()
    }
}

/// Encode `cell`, seal its header for `recipient` and append the payload
pub fn seal_message(cell: &OnionCell, recipient: &dyn HeaderSeal) -> Result<Vec<u8>, OnionError> {
    let encoded = encode_cell(cell);
    let (header, payload) = split_header(&encoded)?;

    let mut message = recipient.seal(&header)?;
    message.extend_from_slice(payload);
    Ok(message)
}

/// Nested Create cells; the exit's cell carries no payload
pub fn build_create(handle: &CircuitHandle) -> Result<Vec<u8>, OnionError> {
    let mut message = Vec::new();

    for (index, hop) in handle.hops.iter().enumerate().rev() {
        let cell = OnionCell::create(
            handle.circuit_id,
            handle.next_address(index),
            handle.params.backward_cipher,
            handle.params.forward_cipher,
            handle.params.expiration,
            hop.seed,
            handle.is_exit(index),
            message,
        );
        message = seal_message(&cell, &hop.public_key)?;
    }

    Ok(message)
}

/// Nested Data cells, each payload under its hop's forward key
pub fn build_data(
    handle: &CircuitHandle,
    request_type: RequestType,
    body: &[u8],
) -> Result<Vec<u8>, OnionError> {
    let forward = handle.params.forward_cipher;
    let mut message = body.to_vec();

    for (index, hop) in handle.hops.iter().enumerate().rev() {
        let is_exit = handle.is_exit(index);
        let payload = encrypt_layer(forward, hop.keys.forward_key(forward)?, &message)?;
        let cell = OnionCell::data(
            handle.circuit_id,
            handle.params.backward_cipher,
            forward,
            is_exit,
            if is_exit { request_type } else { RequestType::None },
            payload,
        );
        message = seal_message(&cell, &hop.public_key)?;
    }

    Ok(message)
}

/// Nested Destroy cells
pub fn build_destroy(handle: &CircuitHandle) -> Result<Vec<u8>, OnionError> {
    let mut message = Vec::new();

    for hop in handle.hops.iter().rev() {
        let cell = OnionCell::destroy(handle.circuit_id, message);
        message = seal_message(&cell, &hop.public_key)?;
    }

    Ok(message)
}

/// Strip the backward layers from a reply, entry hop first
pub fn peel_response(handle: &CircuitHandle, reply: &[u8]) -> Result<Vec<u8>, OnionError> {
    let backward = handle.params.backward_cipher;
    let mut plain = reply.to_vec();

    for hop in &handle.hops {
        plain = decrypt_layer(backward, hop.keys.backward_key(backward)?, &plain)?;
    }

    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{decode_cell, CellType, HEADER_SIZE};
    use crate::crypto::{HeaderOpen, RelayIdentity};

    fn setup(params: CircuitParams) -> (Vec<RelayIdentity>, CircuitHandle) {
        let identities: Vec<_> = (0..3).map(|_| RelayIdentity::generate_x25519()).collect();
        let descriptors: Vec<_> = identities
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let addr: SocketAddrV4 = format!("127.0.0.1:{}", 9001 + i).parse().unwrap();
                RelayDescriptor::new(addr, id.public_key(), 0).unwrap()
            })
            .collect();
        let route = Route::new(
            descriptors[0].clone(),
            descriptors[1].clone(),
            descriptors[2].clone(),
        );
        let destination: SocketAddrV4 = "127.0.0.1:8080".parse().unwrap();
        let handle = CircuitHandle::new(1000, &route, destination, params).unwrap();
        (identities, handle)
    }

    fn open(identity: &RelayIdentity, message: &[u8]) -> OnionCell {
        let (sealed, payload) = message.split_at(identity.sealed_len());
        let header = identity.open(sealed).unwrap();
        let mut bytes = header.to_vec();
        bytes.extend_from_slice(payload);
        decode_cell(&bytes).unwrap()
    }

    #[test]
    fn test_create_nesting_reveals_one_hop_each() {
        let (identities, handle) = setup(CircuitParams::default());
        let mut message = build_create(&handle).unwrap();

        for (index, identity) in identities.iter().enumerate() {
            let cell = open(identity, &message);
            assert_eq!(cell.cell_type, CellType::Create);
            assert_eq!(cell.circuit_id, 1000);
            assert_eq!(cell.key_seed, handle.hops[index].seed);
            assert_eq!(cell.is_exit_node, index == 2);
            assert_eq!(cell.next_hop(), handle.next_address(index));
            message = cell.payload;
        }
        assert!(message.is_empty());
    }

    #[test]
    fn test_data_layers_peel_to_body() {
        for cipher in [1u8, 2u8] {
            let params = CircuitParams {
                backward_cipher: cipher,
                forward_cipher: cipher,
                expiration: 30,
            };
            let (identities, handle) = setup(params);
            let mut message = build_data(&handle, RequestType::Echo, b"ping").unwrap();

            for (index, identity) in identities.iter().enumerate() {
                let cell = open(identity, &message);
                assert_eq!(cell.cell_type, CellType::Data);
                assert_eq!(cell.ip, [0; 4]);
                assert_eq!(cell.port, 0);
                let keys = &handle.hops[index].keys;
                message = decrypt_layer(cipher, keys.forward_key(cipher).unwrap(), &cell.payload)
                    .unwrap();
                if index == 2 {
                    assert!(cell.is_exit_node);
                    assert_eq!(cell.request_type, RequestType::Echo);
                } else {
                    assert_eq!(cell.request_type, RequestType::None);
                }
            }
            assert_eq!(message, b"ping");
        }
    }

    #[test]
    fn test_default_data_layer_uses_key1() {
        let (identities, handle) = setup(CircuitParams::default());
        assert_eq!(handle.params.forward_cipher, LayerCipher::Rc4.selector());
        assert_eq!(handle.params.backward_cipher, LayerCipher::Rc4.selector());

        let message = build_data(&handle, RequestType::Echo, b"ping").unwrap();
        let cell = open(&identities[0], &message);
        let keys = &handle.hops[0].keys;
        assert_eq!(keys.forward_key(1).unwrap(), &keys.key1[..]);

        // The entry layer comes off with key1 and exposes the middle hop's message
        let inner = decrypt_layer(1, &keys.key1, &cell.payload).unwrap();
        let middle = open(&identities[1], &inner);
        assert_eq!(middle.circuit_id, 1000);
        assert_eq!(middle.cell_type, CellType::Data);
    }

    #[test]
    fn test_peel_response_mirrors_relay_layering() {
        let (_, handle) = setup(CircuitParams::default());
        let backward = handle.params.backward_cipher;

        // Exit encrypts first, entry last
        let mut reply = b"pong".to_vec();
        for hop in handle.hops.iter().rev() {
            reply = encrypt_layer(backward, hop.keys.backward_key(backward).unwrap(), &reply)
                .unwrap();
        }
        assert_eq!(peel_response(&handle, &reply).unwrap(), b"pong");
    }

    #[test]
    fn test_destroy_nesting() {
        let (identities, handle) = setup(CircuitParams::default());
        let mut message = build_destroy(&handle).unwrap();

        for identity in &identities {
            let cell = open(identity, &message);
            assert_eq!(cell.cell_type, CellType::Destroy);
            assert_eq!(cell.circuit_id, 1000);
            message = cell.payload;
        }
        assert!(message.is_empty());
    }

    #[test]
    fn test_seal_message_length() {
        let identity = RelayIdentity::generate_x25519();
        let cell = OnionCell::padding(1, vec![0u8; 10]);
        let message = seal_message(&cell, identity.public_key()).unwrap();
        assert_eq!(message.len(), identity.sealed_len() + 10);
        assert!(identity.sealed_len() > HEADER_SIZE);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = CircuitParams {
            backward_cipher: 0,
            ..CircuitParams::default()
        };
        assert!(params.validate().is_err());

        let params = CircuitParams {
            expiration: 0,
            ..CircuitParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_handle_rejects_bad_descriptor() {
        let bad = RelayDescriptor {
            address: "127.0.0.1:1".to_string(),
            public_key: vec![9, 9],
            load: 0,
        };
        let route = Route::new(bad.clone(), bad.clone(), bad);
        let result = CircuitHandle::new(
            1,
            &route,
            "127.0.0.1:2".parse().unwrap(),
            CircuitParams::default(),
        );
        assert!(result.is_err());
    }
}
