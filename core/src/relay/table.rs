// Circuit table — per-relay state for every circuit passing through
//
// One mutex guards the map; the load counter moves only while it is held, so
// `load()` always equals the number of live entries at some instant.

use crate::cell::{KeySeed, OnionCell};
use crate::crypto::{derive_keys, DerivedKeys};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Circuit {0} not found")]
    CircuitNotFound(u16),
}

/// What a relay remembers about one circuit. Never leaves the relay.
#[derive(Clone)]
pub struct CircuitInfo {
    pub backward_cipher: u8,
    pub forward_cipher: u8,
    /// Next relay, or the application server at the exit
    pub forward_address: SocketAddrV4,
    /// Whoever sent the Create cell
    pub backward_address: SocketAddr,
    /// Idle lifetime restarted by every Data cell
    pub expiration: Duration,
    pub expires_at: Instant,
    pub is_exit_node: bool,
    pub key_seed: KeySeed,
    pub keys: DerivedKeys,
}

impl CircuitInfo {
    /// State for a freshly received Create cell
    pub fn from_create(cell: &OnionCell, peer: SocketAddr, now: Instant) -> Self {
        let expiration = Duration::from_secs(cell.expiration as u64);
        Self {
            backward_cipher: cell.backward_cipher,
            forward_cipher: cell.forward_cipher,
            forward_address: cell.next_hop(),
            backward_address: peer,
            expiration,
            expires_at: now + expiration,
            is_exit_node: cell.is_exit_node,
            key_seed: cell.key_seed,
            keys: derive_keys(&cell.key_seed),
        }
    }
}

impl fmt::Debug for CircuitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitInfo")
            .field("backward_cipher", &self.backward_cipher)
            .field("forward_cipher", &self.forward_cipher)
            .field("forward_address", &self.forward_address)
            .field("backward_address", &self.backward_address)
            .field("expiration", &self.expiration)
            .field("is_exit_node", &self.is_exit_node)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct CircuitTable {
    circuits: Mutex<HashMap<u16, CircuitInfo>>,
    load: AtomicI64,
}

impl CircuitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `info` under `id`. Returns true if an existing circuit was replaced,
    /// in which case the load is unchanged.
    pub fn insert(&self, id: u16, info: CircuitInfo) -> bool {
        let mut circuits = self.circuits.lock();
        let replaced = circuits.insert(id, info).is_some();
        if !replaced {
            self.load.fetch_add(1, Ordering::SeqCst);
        }
        replaced
    }

    /// Look up a circuit and restart its expiry clock.
    ///
    /// A circuit already past its deadline is treated as gone and evicted here
    /// rather than waiting for the sweeper.
    pub fn get_and_touch(&self, id: u16, now: Instant) -> Result<CircuitInfo, TableError> {
        let mut circuits = self.circuits.lock();
        match circuits.get_mut(&id) {
            Some(info) if info.expires_at > now => {
                info.expires_at = now + info.expiration;
                return Ok(info.clone());
            }
            Some(_) => {}
            None => return Err(TableError::CircuitNotFound(id)),
        }
        circuits.remove(&id);
        self.load.fetch_sub(1, Ordering::SeqCst);
        Err(TableError::CircuitNotFound(id))
    }

    pub fn remove(&self, id: u16) -> Option<CircuitInfo> {
        let mut circuits = self.circuits.lock();
        let removed = circuits.remove(&id);
        if removed.is_some() {
            self.load.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    /// Evict every circuit whose deadline is at or before `now`
    pub fn sweep(&self, now: Instant) -> Vec<u16> {
        let mut circuits = self.circuits.lock();
        let expired: Vec<u16> = circuits
            .iter()
            .filter(|(_, info)| info.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            circuits.remove(id);
        }
        self.load.fetch_sub(expired.len() as i64, Ordering::SeqCst);
        expired
    }

    /// Number of circuits currently carried, as advertised in the directory
    pub fn load(&self) -> i64 {
        self.load.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.circuits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: u16) -> bool {
        self.circuits.lock().contains_key(&id)
    }
}
