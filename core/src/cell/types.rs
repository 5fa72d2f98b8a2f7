// Cell types — the logical view of an onion cell before it hits the wire

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;

/// Protocol version written into every cell header
pub const PROTOCOL_VERSION: u8 = 1;

/// Reply an exit hop gives to a Create cell that carries no inner message
pub const EXIT_ACK: &[u8] = b"Exit Node Reached";

/// 16 bytes of per-hop randomness; the relay derives its symmetric keys from it
pub type KeySeed = [u8; 16];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CellError {
    #[error("Malformed cell: {0}")]
    MalformedCell(String),
}

/// What kind of cell this is (low nibble of header byte 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CellType {
    /// Cover traffic, consumed and discarded
    Padding = 0,
    /// Circuit creation, carries the hop's key seed
    Create = 1,
    /// Application data over an existing circuit
    Data = 2,
    /// Circuit teardown
    Destroy = 3,
}

impl CellType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CellType::Padding),
            1 => Some(CellType::Create),
            2 => Some(CellType::Data),
            3 => Some(CellType::Destroy),
            _ => None,
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellType::Padding => write!(f, "Padding"),
            CellType::Create => write!(f, "Create"),
            CellType::Data => write!(f, "Data"),
            CellType::Destroy => write!(f, "Destroy"),
        }
    }
}

/// Application-level tag routed to the application server by the exit hop.
///
/// Three bits on the wire, so at most eight request kinds exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RequestType {
    /// Not an application request (intermediate hops, control cells)
    None = 0,
    Greet = 1,
    Fibonacci = 2,
    RandomNumbers = 3,
    Echo = 4,
}

impl RequestType {
    /// Largest value that fits in the header's request-type bits
    pub const MAX_WIRE_VALUE: u8 = 0x07;

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RequestType::None),
            1 => Some(RequestType::Greet),
            2 => Some(RequestType::Fibonacci),
            3 => Some(RequestType::RandomNumbers),
            4 => Some(RequestType::Echo),
            _ => None,
        }
    }
}

/// An onion cell: 32-byte header plus opaque payload.
///
/// `port`/`ip` name the next hop and are only meaningful for Create cells.
/// The payload is either plaintext application data (exit hop) or the
/// already-encrypted message for the next hop.
#[derive(Clone, PartialEq, Eq)]
pub struct OnionCell {
    pub cell_type: CellType,
    pub circuit_id: u16,
    pub version: u8,
    /// Cipher selector for the backward (response) layer
    pub backward_cipher: u8,
    /// Cipher selector for the forward (payload) layer
    pub forward_cipher: u8,
    pub port: u16,
    pub ip: [u8; 4],
    /// Circuit lifetime in seconds
    pub expiration: u32,
    pub key_seed: KeySeed,
    pub is_exit_node: bool,
    pub request_type: RequestType,
    pub payload: Vec<u8>,
}

impl OnionCell {
    /// Create cell addressed to `next_hop`
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        circuit_id: u16,
        next_hop: SocketAddrV4,
        backward_cipher: u8,
        forward_cipher: u8,
        expiration: u32,
        key_seed: KeySeed,
        is_exit_node: bool,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            cell_type: CellType::Create,
            circuit_id,
            version: PROTOCOL_VERSION,
            backward_cipher,
            forward_cipher,
            port: next_hop.port(),
            ip: next_hop.ip().octets(),
            expiration,
            key_seed,
            is_exit_node,
            request_type: RequestType::None,
            payload,
        }
    }

    /// Data cell for an existing circuit; the address fields stay zero
    pub fn data(
        circuit_id: u16,
        backward_cipher: u8,
        forward_cipher: u8,
        is_exit_node: bool,
        request_type: RequestType,
        payload: Vec<u8>,
    ) -> Self {
        let mut key_seed = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut key_seed);

        Self {
            cell_type: CellType::Data,
            circuit_id,
            version: PROTOCOL_VERSION,
            backward_cipher,
            forward_cipher,
            port: 0,
            ip: [0; 4],
            expiration: 0,
            // Unused by the relay; random so two Data headers never repeat
            key_seed,
            is_exit_node,
            request_type,
            payload,
        }
    }

    /// Padding cell carrying decoy bytes
    pub fn padding(circuit_id: u16, payload: Vec<u8>) -> Self {
        let mut key_seed = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut key_seed);

        Self {
            cell_type: CellType::Padding,
            circuit_id,
            version: PROTOCOL_VERSION,
            backward_cipher: 0,
            forward_cipher: 0,
            port: 0,
            ip: [0; 4],
            expiration: 0,
            key_seed,
            is_exit_node: false,
            request_type: RequestType::None,
            payload,
        }
    }

    /// Destroy cell; `payload` is the destroy message for the next hop
    pub fn destroy(circuit_id: u16, payload: Vec<u8>) -> Self {
        Self {
            cell_type: CellType::Destroy,
            circuit_id,
            version: PROTOCOL_VERSION,
            backward_cipher: 0,
            forward_cipher: 0,
            port: 0,
            ip: [0; 4],
            expiration: 0,
            key_seed: [0; 16],
            is_exit_node: false,
            request_type: RequestType::None,
            payload,
        }
    }

    /// The next hop named by the header
    pub fn next_hop(&self) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::from(self.ip), self.port)
    }
}

// Key seeds and payloads are kept out of debug output
impl fmt::Debug for OnionCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnionCell")
            .field("cell_type", &self.cell_type)
            .field("circuit_id", &self.circuit_id)
            .field("version", &self.version)
            .field("backward_cipher", &self.backward_cipher)
            .field("forward_cipher", &self.forward_cipher)
            .field("next_hop", &self.next_hop())
            .field("expiration", &self.expiration)
            .field("is_exit_node", &self.is_exit_node)
            .field("request_type", &self.request_type)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_type_from_u8() {
        assert_eq!(CellType::from_u8(0), Some(CellType::Padding));
        assert_eq!(CellType::from_u8(3), Some(CellType::Destroy));
        assert_eq!(CellType::from_u8(4), None);
    }

    #[test]
    fn test_request_type_fits_wire_bits() {
        for value in 0..=RequestType::MAX_WIRE_VALUE {
            if let Some(kind) = RequestType::from_u8(value) {
                assert!(kind as u8 <= RequestType::MAX_WIRE_VALUE);
            }
        }
        assert_eq!(RequestType::from_u8(5), None);
    }

    #[test]
    fn test_create_cell_addresses_next_hop() {
        let next: SocketAddrV4 = "10.0.0.7:9002".parse().unwrap();
        let cell = OnionCell::create(1000, next, 1, 2, 60, [7u8; 16], true, vec![]);

        assert_eq!(cell.cell_type, CellType::Create);
        assert_eq!(cell.circuit_id, 1000);
        assert_eq!(cell.next_hop(), next);
        assert!(cell.is_exit_node);
        assert_eq!(cell.version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_data_cell_has_zero_address() {
        let cell = OnionCell::data(5, 1, 1, false, RequestType::None, b"x".to_vec());
        assert_eq!(cell.ip, [0; 4]);
        assert_eq!(cell.port, 0);
    }

    #[test]
    fn test_debug_hides_seed() {
        let cell = OnionCell::padding(1, vec![1, 2, 3]);
        let shown = format!("{:?}", cell);
        assert!(shown.contains("payload_len"));
        assert!(!shown.contains("key_seed"));
    }
}
