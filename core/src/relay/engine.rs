// Forwarding engine — peel one layer, act on the cell, wrap the reply
//
//   Create   record circuit state, forward the inner message (or ack at the end)
//   Data     refresh the circuit, decrypt one forward layer, forward or ask the app
//   Padding  drop
//   Destroy  forget the circuit, pass the teardown on
//
// Every non-empty reply leaves with this hop's backward layer added.

use super::context::RelayContext;
use super::table::CircuitInfo;
use super::RelayError;
use crate::app::AppRequest;
use crate::cell::{decode_cell, CellType, OnionCell, EXIT_ACK, HEADER_SIZE};
use crate::crypto::{decrypt_layer, encrypt_layer, CryptoError, HeaderOpen, LayerCipher};
use crate::transport::{RequestHandler, RpcError};
use async_trait::async_trait;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Split off the sealed header, open it and decode the cell
pub fn open_message(identity: &dyn HeaderOpen, message: &[u8]) -> Result<OnionCell, RelayError> {
    let sealed_len = identity.sealed_len();
    if message.len() < sealed_len {
        return Err(CryptoError::DecryptionFailure(format!(
            "message of {} bytes is shorter than the {}-byte sealed header",
            message.len(),
            sealed_len
        ))
        .into());
    }
    let (sealed, payload) = message.split_at(sealed_len);
    let header = identity.open(sealed)?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(payload);
    Ok(decode_cell(&bytes)?)
}

pub struct RelayEngine {
    ctx: Arc<RelayContext>,
}

impl RelayEngine {
    pub fn new(ctx: Arc<RelayContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    /// Process one inbound message from `peer`
    pub async fn handle(&self, peer: SocketAddr, message: Vec<u8>) -> Result<Vec<u8>, RelayError> {
        let cell = open_message(&self.ctx.identity, &message)?;
        debug!(
            "{} cell for circuit {} from {}",
            cell.cell_type, cell.circuit_id, peer
        );

        match cell.cell_type {
            CellType::Padding => {
                debug!("Discarding padding cell ({} bytes)", cell.payload.len());
                Ok(Vec::new())
            }
            CellType::Create => self.handle_create(peer, cell).await,
            CellType::Data => self.handle_data(cell).await,
            CellType::Destroy => self.handle_destroy(cell).await,
        }
    }

    async fn handle_create(&self, peer: SocketAddr, cell: OnionCell) -> Result<Vec<u8>, RelayError> {
        LayerCipher::from_selector(cell.backward_cipher)?;
        LayerCipher::from_selector(cell.forward_cipher)?;

        let id = cell.circuit_id;
        let info = CircuitInfo::from_create(&cell, peer, Instant::now());
        let replaced = self.ctx.table.insert(id, info.clone());
        info!(
            "Circuit {} created (exit: {}, next: {}, load: {}{})",
            id,
            info.is_exit_node,
            info.forward_address,
            self.ctx.table.load(),
            if replaced { ", replaced existing" } else { "" }
        );

        let reply = if cell.payload.is_empty() {
            EXIT_ACK.to_vec()
        } else {
            match self.forward(id, info.forward_address, cell.payload).await {
                Ok(reply) => reply,
                Err(e) => {
                    // Half-built circuits are not kept
                    self.ctx.table.remove(id);
                    return Err(e);
                }
            }
        };

        wrap_backward(&info, &reply)
    }

    async fn handle_data(&self, cell: OnionCell) -> Result<Vec<u8>, RelayError> {
        let id = cell.circuit_id;
        let info = self.ctx.table.get_and_touch(id, Instant::now())?;

        let forward = info.forward_cipher;
        let inner = decrypt_layer(forward, info.keys.forward_key(forward)?, &cell.payload)?;

        let reply = if info.is_exit_node {
            debug!(
                "Circuit {} exit: {:?} request to {}",
                id, cell.request_type, info.forward_address
            );
            let request = AppRequest::new(cell.request_type, inner);
            self.forward(id, info.forward_address, request.encode()).await?
        } else {
            self.forward(id, info.forward_address, inner).await?
        };

        wrap_backward(&info, &reply)
    }

    async fn handle_destroy(&self, cell: OnionCell) -> Result<Vec<u8>, RelayError> {
        let id = cell.circuit_id;
        let info = match self.ctx.table.remove(id) {
            Some(info) => info,
            None => {
                debug!("Destroy for unknown circuit {}", id);
                return Ok(Vec::new());
            }
        };
        info!("Circuit {} destroyed (load: {})", id, self.ctx.table.load());

        let mut reply = Vec::new();
        if !cell.payload.is_empty() && !info.is_exit_node {
            // Local state is already gone; teardown continues best-effort
            match self.forward(id, info.forward_address, cell.payload).await {
                Ok(downstream) => reply = downstream,
                Err(e) => warn!("Destroy for circuit {} not delivered downstream: {}", id, e),
            }
        }

        wrap_backward(&info, &reply)
    }

    async fn forward(
        &self,
        circuit_id: u16,
        next: SocketAddrV4,
        message: Vec<u8>,
    ) -> Result<Vec<u8>, RelayError> {
        self.ctx
            .transport
            .call(SocketAddr::V4(next), message)
            .await
            .map_err(|e| match e {
                RpcError::CircuitNotFound => RelayError::CircuitNotFound(circuit_id),
                RpcError::Unavailable(reason) => RelayError::PeerUnreachable(format!("{}: {}", next, reason)),
                RpcError::Internal(reason) => RelayError::Downstream(reason),
            })
    }
}

fn wrap_backward(info: &CircuitInfo, reply: &[u8]) -> Result<Vec<u8>, RelayError> {
    let backward = info.backward_cipher;
    Ok(encrypt_layer(backward, info.keys.backward_key(backward)?, reply)?)
}

#[async_trait]
impl RequestHandler for RelayEngine {
    async fn handle(&self, peer: SocketAddr, request: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        RelayEngine::handle(self, peer, request).await.map_err(|e| {
            match &e {
                RelayError::CircuitNotFound(_) => debug!("{}", e),
                _ => warn!("Request from {} failed: {}", peer, e),
            }
            RpcError::from(e)
        })
    }
}
