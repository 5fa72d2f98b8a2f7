// Cover traffic — Padding cells sent to random peers at random intervals
//
// Makes a relay's outbound traffic less correlated with real circuit activity.
// Padding is unauthenticated and best-effort: failures are logged and dropped.

use crate::cell::OnionCell;
use crate::directory::RelayDescriptor;
use crate::privacy::onion::{seal_message, OnionError};
use crate::relay::RelayContext;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CoverTrafficError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("No other relay to pad towards")]
    NoPeers,
    #[error(transparent)]
    Onion(#[from] OnionError),
    #[error("Directory error: {0}")]
    Directory(String),
    #[error("Send failed: {0}")]
    Send(String),
}

/// Padding schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddingConfig {
    pub enabled: bool,
    /// Lower bound of the random wait between padding cells
    pub min_interval_ms: u64,
    /// Upper bound of the random wait between padding cells
    pub max_interval_ms: u64,
    /// Padding payloads are 1..=max_payload_bytes random bytes
    pub max_payload_bytes: usize,
}

impl Default for PaddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_ms: 15_000,
            max_interval_ms: 25_000,
            max_payload_bytes: 64,
        }
    }
}

impl PaddingConfig {
    pub fn validate(&self) -> Result<(), CoverTrafficError> {
        if self.min_interval_ms == 0 {
            return Err(CoverTrafficError::InvalidConfig(
                "min_interval_ms must be > 0".to_string(),
            ));
        }
        if self.min_interval_ms > self.max_interval_ms {
            return Err(CoverTrafficError::InvalidConfig(
                "min_interval_ms exceeds max_interval_ms".to_string(),
            ));
        }
        if self.max_payload_bytes == 0 || self.max_payload_bytes > 65536 {
            return Err(CoverTrafficError::InvalidConfig(
                "max_payload_bytes must be in 1..=65536".to_string(),
            ));
        }
        Ok(())
    }

    /// Random wait before the next padding cell
    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_millis(rng.gen_range(self.min_interval_ms..=self.max_interval_ms))
    }
}

/// Uniformly pick a relay other than `own_address`
pub fn choose_target<'a, R: Rng + ?Sized>(
    relays: &'a [RelayDescriptor],
    own_address: &str,
    rng: &mut R,
) -> Option<&'a RelayDescriptor> {
    let others: Vec<&RelayDescriptor> = relays
        .iter()
        .filter(|r| r.address != own_address)
        .collect();
    if others.is_empty() {
        return None;
    }
    Some(others[rng.gen_range(0..others.len())])
}

/// Sealed Padding cell for `target` with a random payload
pub fn build_padding<R: Rng + ?Sized>(
    target: &RelayDescriptor,
    max_payload_bytes: usize,
    rng: &mut R,
) -> Result<Vec<u8>, CoverTrafficError> {
    let public_key = target.relay_public_key().map_err(OnionError::from)?;
    let mut payload = vec![0u8; rng.gen_range(1..=max_payload_bytes)];
    rng.fill_bytes(&mut payload);

    let cell = OnionCell::padding(rng.gen(), payload);
    Ok(seal_message(&cell, &public_key)?)
}

/// Send one padding cell to a random peer
pub async fn send_padding(ctx: &RelayContext) -> Result<SocketAddr, CoverTrafficError> {
    let relays = ctx
        .directory
        .list()
        .await
        .map_err(|e| CoverTrafficError::Directory(e.to_string()))?;

    let own = ctx.address.to_string();
    let (target, message) = {
        let mut rng = rand::thread_rng();
        let target = choose_target(&relays, &own, &mut rng).ok_or(CoverTrafficError::NoPeers)?;
        let message = build_padding(target, ctx.config.padding.max_payload_bytes, &mut rng)?;
        let addr = target
            .socket_addr()
            .map_err(|e| CoverTrafficError::Directory(e.to_string()))?;
        (SocketAddr::V4(addr), message)
    };

    ctx.transport
        .call(target, message)
        .await
        .map_err(|e| CoverTrafficError::Send(e.to_string()))?;
    Ok(target)
}

/// Padding loop; exits when `shutdown` flips to true
pub fn spawn_padding(ctx: Arc<RelayContext>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Padding generator started for {}", ctx.node_id);
        loop {
            let delay = ctx.config.padding.next_delay(&mut rand::thread_rng());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match send_padding(&ctx).await {
                Ok(target) => debug!("Padding sent to {}", target),
                Err(CoverTrafficError::NoPeers) => debug!("No other relays registered; skipping padding"),
                Err(e) => warn!("Padding failed: {}", e),
            }
        }
        info!("Padding generator stopped for {}", ctx.node_id);
    })
}
