// Cell module — the fixed-header protocol unit exchanged between adjacent nodes

pub mod codec;
pub mod types;

pub use codec::{decode_cell, encode_cell, split_header, HEADER_SIZE};
pub use types::{CellError, CellType, KeySeed, OnionCell, RequestType, EXIT_ACK, PROTOCOL_VERSION};
