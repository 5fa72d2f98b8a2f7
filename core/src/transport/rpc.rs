// RPC contract — one opaque request, one opaque reply or a typed failure

use async_trait::async_trait;
use std::net::SocketAddr;
use thiserror::Error;

/// Failure as seen by the caller of a relay
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The callee has no state for the circuit (expired or never created)
    #[error("Circuit not found")]
    CircuitNotFound,
    /// Could not reach the callee, or it did not answer in time
    #[error("Peer unavailable: {0}")]
    Unavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Status byte of a response frame
pub(crate) const STATUS_OK: u8 = 0;
pub(crate) const STATUS_CIRCUIT_NOT_FOUND: u8 = 1;
pub(crate) const STATUS_UNAVAILABLE: u8 = 2;
pub(crate) const STATUS_INTERNAL: u8 = 3;

/// Flatten a handler result into (status, body)
pub(crate) fn encode_outcome(outcome: Result<Vec<u8>, RpcError>) -> (u8, Vec<u8>) {
    match outcome {
        Ok(body) => (STATUS_OK, body),
        Err(RpcError::CircuitNotFound) => (STATUS_CIRCUIT_NOT_FOUND, Vec::new()),
        Err(RpcError::Unavailable(msg)) => (STATUS_UNAVAILABLE, msg.into_bytes()),
        Err(RpcError::Internal(msg)) => (STATUS_INTERNAL, msg.into_bytes()),
    }
}

/// Inverse of [`encode_outcome`]
pub(crate) fn decode_outcome(status: u8, body: Vec<u8>) -> Result<Vec<u8>, RpcError> {
    match status {
        STATUS_OK => Ok(body),
        STATUS_CIRCUIT_NOT_FOUND => Err(RpcError::CircuitNotFound),
        STATUS_UNAVAILABLE => Err(RpcError::Unavailable(
            String::from_utf8_lossy(&body).into_owned(),
        )),
        STATUS_INTERNAL => Err(RpcError::Internal(
            String::from_utf8_lossy(&body).into_owned(),
        )),
        other => Err(RpcError::Internal(format!("unknown response status {}", other))),
    }
}

/// Outbound side: deliver `request` to the node at `addr` and wait for its reply
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn call(&self, addr: SocketAddr, request: Vec<u8>) -> Result<Vec<u8>, RpcError>;
}

/// Inbound side: serve one request from `peer`
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, peer: SocketAddr, request: Vec<u8>) -> Result<Vec<u8>, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_status_mapping() {
        assert_eq!(encode_outcome(Ok(b"ok".to_vec())), (STATUS_OK, b"ok".to_vec()));
        assert_eq!(
            encode_outcome(Err(RpcError::CircuitNotFound)).0,
            STATUS_CIRCUIT_NOT_FOUND
        );

        for err in [
            RpcError::CircuitNotFound,
            RpcError::Unavailable("gone".to_string()),
            RpcError::Internal("boom".to_string()),
        ] {
            let (status, body) = encode_outcome(Err(err.clone()));
            assert_eq!(decode_outcome(status, body), Err(err));
        }
    }

    #[test]
    fn test_unknown_status_is_internal() {
        assert!(matches!(
            decode_outcome(42, Vec::new()),
            Err(RpcError::Internal(_))
        ));
    }
}
