// Onion client — builds a circuit and sends requests through it
//
// A request that fails with CircuitNotFound (a relay forgot the circuit, e.g.
// after it expired) triggers a rebuild under the next circuit id and a resend,
// up to `max_attempts` tries. Any other failure ends the request immediately.

use crate::cell::{RequestType, EXIT_ACK};
use crate::directory::{Directory, DirectoryError};
use crate::privacy::circuit::{select_route, CircuitError};
use crate::privacy::onion::{
    build_create, build_data, build_destroy, peel_response, CircuitHandle, CircuitParams,
    OnionError,
};
use crate::transport::{RelayTransport, RpcError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Route(#[from] CircuitError),
    #[error(transparent)]
    Onion(#[from] OnionError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("Unexpected circuit acknowledgement: {0:?}")]
    UnexpectedAck(String),
    #[error("No circuit established")]
    NoCircuit,
    #[error("Gave up after {0} attempts")]
    RetriesExhausted(u32),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Application server the exit relay talks to
    pub destination: SocketAddrV4,
    /// Circuit id for the first circuit; random when unset
    pub circuit_id: Option<u16>,
    /// Tries per request, counting the first
    pub max_attempts: u32,
    pub params: CircuitParams,
}

impl ClientConfig {
    pub fn new(destination: SocketAddrV4) -> Self {
        Self {
            destination,
            circuit_id: None,
            max_attempts: 3,
            params: CircuitParams::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.max_attempts == 0 {
            return Err(ClientError::InvalidConfig(
                "max_attempts must be > 0".to_string(),
            ));
        }
        self.params.validate()?;
        Ok(())
    }
}

pub struct OnionClient {
    directory: Arc<dyn Directory>,
    transport: Arc<dyn RelayTransport>,
    config: ClientConfig,
    circuit: Option<CircuitHandle>,
    next_circuit_id: u16,
}

impl OnionClient {
    pub fn new(
        directory: Arc<dyn Directory>,
        transport: Arc<dyn RelayTransport>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let next_circuit_id = config
            .circuit_id
            .unwrap_or_else(|| rand::thread_rng().gen());
        Ok(Self {
            directory,
            transport,
            config,
            circuit: None,
            next_circuit_id,
        })
    }

    /// The live circuit, if any
    pub fn circuit(&self) -> Option<&CircuitHandle> {
        self.circuit.as_ref()
    }

    /// Id the next circuit will be built with
    pub fn next_circuit_id(&self) -> u16 {
        self.next_circuit_id
    }

    /// Build a circuit with the next circuit id
    pub async fn build_circuit(&mut self) -> Result<&CircuitHandle, ClientError> {
        self.build_circuit_with_id(self.next_circuit_id).await
    }

    /// Build a circuit under exactly `circuit_id`, replacing any current one
    pub async fn build_circuit_with_id(
        &mut self,
        circuit_id: u16,
    ) -> Result<&CircuitHandle, ClientError> {
        let relays = self.directory.list().await?;
        let route = select_route(&relays, &mut rand::thread_rng())?;
        debug!(
            "Circuit {} route: {} -> {} -> {}",
            circuit_id,
            route.entry().address,
            route.middle().address,
            route.exit().address
        );

        let handle = CircuitHandle::new(
            circuit_id,
            &route,
            self.config.destination,
            self.config.params,
        )?;
        let message = build_create(&handle)?;
        let entry = SocketAddr::V4(handle.entry_address()?);

        let reply = self.transport.call(entry, message).await?;
        let ack = peel_response(&handle, &reply)?;
        if ack != EXIT_ACK {
            return Err(ClientError::UnexpectedAck(
                String::from_utf8_lossy(&ack).into_owned(),
            ));
        }

        info!("Circuit {} established via {}", circuit_id, entry);
        self.next_circuit_id = circuit_id;
        Ok(self.circuit.insert(handle))
    }

    async fn send_data(
        &self,
        handle: &CircuitHandle,
        request_type: RequestType,
        body: &[u8],
    ) -> Result<Vec<u8>, ClientError> {
        let message = build_data(handle, request_type, body)?;
        let entry = SocketAddr::V4(handle.entry_address()?);
        let reply = self.transport.call(entry, message).await?;
        Ok(peel_response(handle, &reply)?)
    }

    /// Send one request to the application server, rebuilding the circuit on
    /// CircuitNotFound
    pub async fn request(
        &mut self,
        request_type: RequestType,
        body: &[u8],
    ) -> Result<Vec<u8>, ClientError> {
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            if self.circuit.is_none() {
                self.build_circuit().await?;
            }
            let handle = self.circuit.clone().ok_or(ClientError::NoCircuit)?;
            debug!(
                "Attempt {}/{}: {:?} on circuit {}",
                attempt, max_attempts, request_type, handle.circuit_id
            );

            match self.send_data(&handle, request_type, body).await {
                Ok(reply) => return Ok(reply),
                Err(ClientError::Rpc(RpcError::CircuitNotFound)) => {
                    self.circuit = None;
                    self.next_circuit_id = handle.circuit_id.wrapping_add(1);
                    warn!(
                        "Attempt {}/{}: circuit {} not found, rebuilding as {}",
                        attempt, max_attempts, handle.circuit_id, self.next_circuit_id
                    );
                }
                Err(e) => {
                    warn!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                    return Err(e);
                }
            }
        }

        Err(ClientError::RetriesExhausted(max_attempts))
    }

    /// Tear the circuit down along its path
    pub async fn destroy(&mut self) -> Result<(), ClientError> {
        let handle = self.circuit.take().ok_or(ClientError::NoCircuit)?;
        let message = build_destroy(&handle)?;
        let entry = SocketAddr::V4(handle.entry_address()?);

        self.transport.call(entry, message).await?;
        info!("Circuit {} destroyed", handle.circuit_id);
        Ok(())
    }
}
