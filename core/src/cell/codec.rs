// Cell codec — byte-exact 32-byte header plus implicit-length payload
//
// | Offset | Size | Field                                   |
// |--------|------|-----------------------------------------|
// | 0      | 1    | type (bits 0-3), request (4-6), exit (7) |
// | 1      | 2    | circuit_id (BE)                          |
// | 3      | 1    | version                                  |
// | 4      | 1    | backward cipher                          |
// | 5      | 1    | forward cipher                           |
// | 6      | 2    | port (BE)                                |
// | 8      | 4    | ipv4                                     |
// | 12     | 4    | expiration seconds (BE)                  |
// | 16     | 16   | key seed                                 |
// | 32     | ..   | payload                                  |

use super::types::{CellError, CellType, OnionCell, RequestType};

/// Size of the fixed cell header
pub const HEADER_SIZE: usize = 32;

const TYPE_MASK: u8 = 0x0F;
const REQUEST_SHIFT: u8 = 4;
const EXIT_FLAG: u8 = 0x80;

/// Serialize a cell: header followed by the raw payload
pub fn encode_cell(cell: &OnionCell) -> Vec<u8> {
    let mut data = Vec::with_capacity(HEADER_SIZE + cell.payload.len());

    let mut first = cell.cell_type as u8;
    first |= ((cell.request_type as u8) & RequestType::MAX_WIRE_VALUE) << REQUEST_SHIFT;
    if cell.is_exit_node {
        first |= EXIT_FLAG;
    }

    data.push(first);
    data.extend_from_slice(&cell.circuit_id.to_be_bytes());
    data.push(cell.version);
    data.push(cell.backward_cipher);
    data.push(cell.forward_cipher);
    data.extend_from_slice(&cell.port.to_be_bytes());
    data.extend_from_slice(&cell.ip);
    data.extend_from_slice(&cell.expiration.to_be_bytes());
    data.extend_from_slice(&cell.key_seed);
    debug_assert_eq!(data.len(), HEADER_SIZE);
    data.extend_from_slice(&cell.payload);

    data
}

/// Parse a cell; everything after byte 32 is payload
pub fn decode_cell(data: &[u8]) -> Result<OnionCell, CellError> {
    if data.len() < HEADER_SIZE {
        return Err(CellError::MalformedCell(format!(
            "need {} header bytes, got {}",
            HEADER_SIZE,
            data.len()
        )));
    }

    let first = data[0];
    let cell_type = CellType::from_u8(first & TYPE_MASK).ok_or_else(|| {
        CellError::MalformedCell(format!("unknown cell type {}", first & TYPE_MASK))
    })?;
    let request_bits = (first >> REQUEST_SHIFT) & RequestType::MAX_WIRE_VALUE;
    let request_type = RequestType::from_u8(request_bits).ok_or_else(|| {
        CellError::MalformedCell(format!("unknown request type {}", request_bits))
    })?;

    let mut ip = [0u8; 4];
    ip.copy_from_slice(&data[8..12]);
    let mut key_seed = [0u8; 16];
    key_seed.copy_from_slice(&data[16..32]);

    Ok(OnionCell {
        cell_type,
        circuit_id: u16::from_be_bytes([data[1], data[2]]),
        version: data[3],
        backward_cipher: data[4],
        forward_cipher: data[5],
        port: u16::from_be_bytes([data[6], data[7]]),
        ip,
        expiration: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
        key_seed,
        is_exit_node: first & EXIT_FLAG != 0,
        request_type,
        payload: data[HEADER_SIZE..].to_vec(),
    })
}

/// Split an encoded cell into its header and payload
pub fn split_header(data: &[u8]) -> Result<([u8; HEADER_SIZE], &[u8]), CellError> {
    if data.len() < HEADER_SIZE {
        return Err(CellError::MalformedCell(format!(
            "need {} header bytes, got {}",
            HEADER_SIZE,
            data.len()
        )));
    }
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&data[..HEADER_SIZE]);
    Ok((header, &data[HEADER_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::types::PROTOCOL_VERSION;
    use proptest::prelude::*;

    fn sample_cell(circuit_id: u16, payload: Vec<u8>) -> OnionCell {
        OnionCell {
            cell_type: CellType::Create,
            circuit_id,
            version: PROTOCOL_VERSION,
            backward_cipher: 1,
            forward_cipher: 2,
            port: 9002,
            ip: [192, 168, 1, 1],
            expiration: 1_700_000_000,
            key_seed: *b"16BytesKeySeed!!",
            is_exit_node: false,
            request_type: RequestType::None,
            payload,
        }
    }

    #[test]
    fn test_header_layout_is_byte_exact() {
        let cell = sample_cell(0x1234, b"Hello, Onion!".to_vec());
        let bytes = encode_cell(&cell);

        assert_eq!(bytes.len(), HEADER_SIZE + 13);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..3], &[0x12, 0x34]);
        assert_eq!(bytes[3], PROTOCOL_VERSION);
        assert_eq!(bytes[4], 1);
        assert_eq!(bytes[5], 2);
        assert_eq!(&bytes[6..8], &9002u16.to_be_bytes());
        assert_eq!(&bytes[8..12], &[192, 168, 1, 1]);
        assert_eq!(&bytes[12..16], &1_700_000_000u32.to_be_bytes());
        assert_eq!(&bytes[16..32], b"16BytesKeySeed!!");
        assert_eq!(&bytes[32..], b"Hello, Onion!");
    }

    #[test]
    fn test_roundtrip_edge_circuit_ids() {
        for id in [0u16, 1, 0xFFFF] {
            let cell = sample_cell(id, b"payload".to_vec());
            let restored = decode_cell(&encode_cell(&cell)).unwrap();
            assert_eq!(restored, cell);
        }
    }

    #[test]
    fn test_roundtrip_empty_payload() {
        let cell = sample_cell(7, Vec::new());
        let bytes = encode_cell(&cell);
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(decode_cell(&bytes).unwrap(), cell);
    }

    #[test]
    fn test_roundtrip_large_payload() {
        let cell = sample_cell(7, vec![0xAB; 1 << 20]);
        assert_eq!(decode_cell(&encode_cell(&cell)).unwrap(), cell);
    }

    #[test]
    fn test_exit_flag_and_request_type_packed_in_first_byte() {
        let mut cell = sample_cell(9, Vec::new());
        cell.cell_type = CellType::Data;
        cell.is_exit_node = true;
        cell.request_type = RequestType::Echo;

        let bytes = encode_cell(&cell);
        assert_eq!(bytes[0], 0x80 | (4 << 4) | 2);
        assert_eq!(decode_cell(&bytes).unwrap(), cell);
    }

    #[test]
    fn test_decode_short_input_is_malformed() {
        let result = decode_cell(&[0u8; HEADER_SIZE - 1]);
        assert!(matches!(result, Err(CellError::MalformedCell(_))));
    }

    #[test]
    fn test_decode_unknown_type_is_malformed() {
        let mut bytes = encode_cell(&sample_cell(1, Vec::new()));
        bytes[0] = 0x0E;
        assert!(decode_cell(&bytes).is_err());
    }

    #[test]
    fn test_split_header() {
        let bytes = encode_cell(&sample_cell(1, vec![1, 2, 3]));
        let (header, payload) = split_header(&bytes).unwrap();
        assert_eq!(&header[..], &bytes[..HEADER_SIZE]);
        assert_eq!(payload, &[1, 2, 3]);
        assert!(split_header(&bytes[..10]).is_err());
    }

    fn any_cell_type() -> impl Strategy<Value = CellType> {
        prop_oneof![
            Just(CellType::Padding),
            Just(CellType::Create),
            Just(CellType::Data),
            Just(CellType::Destroy),
        ]
    }

    fn any_request_type() -> impl Strategy<Value = RequestType> {
        prop_oneof![
            Just(RequestType::None),
            Just(RequestType::Greet),
            Just(RequestType::Fibonacci),
            Just(RequestType::RandomNumbers),
            Just(RequestType::Echo),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(
            cell_type in any_cell_type(),
            request_type in any_request_type(),
            circuit_id in any::<u16>(),
            version in any::<u8>(),
            backward_cipher in any::<u8>(),
            forward_cipher in any::<u8>(),
            port in any::<u16>(),
            ip in any::<[u8; 4]>(),
            expiration in any::<u32>(),
            key_seed in any::<[u8; 16]>(),
            is_exit_node in any::<bool>(),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let cell = OnionCell {
                cell_type,
                circuit_id,
                version,
                backward_cipher,
                forward_cipher,
                port,
                ip,
                expiration,
                key_seed,
                is_exit_node,
                request_type,
                payload,
            };
            prop_assert_eq!(decode_cell(&encode_cell(&cell)).unwrap(), cell);
        }
    }
}
