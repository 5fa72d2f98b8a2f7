// Relay — the node that carries circuits
//
// A relay owns a `RelayContext` (identity, address, circuit table and
// collaborators). `RelayEngine` handles inbound cells; `RelayService` wires the
// engine to a listener and runs the sweeper, keep-alive and padding tasks.

pub mod context;
pub mod engine;
pub mod service;
pub mod sweeper;
pub mod table;

use crate::cell::CellError;
use crate::crypto::CryptoError;
use crate::directory::DirectoryError;
use crate::transport::RpcError;
use thiserror::Error;

pub use context::{RelayConfig, RelayContext};
pub use engine::{open_message, RelayEngine};
pub use service::{spawn_keepalive, RelayService};
pub use sweeper::{spawn_sweeper, sweep_once};
pub use table::{CircuitInfo, CircuitTable, TableError};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Cell(#[from] CellError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("Circuit {0} not found")]
    CircuitNotFound(u16),
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error("Downstream failure: {0}")]
    Downstream(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<TableError> for RelayError {
    fn from(e: TableError) -> Self {
        match e {
            TableError::CircuitNotFound(id) => RelayError::CircuitNotFound(id),
        }
    }
}

impl From<RelayError> for RpcError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::CircuitNotFound(_) => RpcError::CircuitNotFound,
            RelayError::PeerUnreachable(reason) => RpcError::Unavailable(reason),
            other => RpcError::Internal(other.to_string()),
        }
    }
}
