// Route selection — picking the entry, middle and exit relays of a circuit
//
// Each pick is weighted by 1 / (load + ε) over the relays not yet chosen,
// so lightly loaded relays are preferred and no relay appears twice.

use crate::directory::RelayDescriptor;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use thiserror::Error;

/// Hops per circuit
pub const ROUTE_LENGTH: usize = 3;

const LOAD_EPSILON: f64 = 1e-6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CircuitError {
    #[error("Not enough relays for a circuit: need {needed}, have {available}")]
    InsufficientRelays { needed: usize, available: usize },
    #[error("Invalid selection weights: {0}")]
    InvalidWeights(String),
}

/// An ordered entry → middle → exit path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    hops: [RelayDescriptor; ROUTE_LENGTH],
}

impl Route {
    pub fn new(entry: RelayDescriptor, middle: RelayDescriptor, exit: RelayDescriptor) -> Self {
        Self {
            hops: [entry, middle, exit],
        }
    }

    pub fn entry(&self) -> &RelayDescriptor {
        &self.hops[0]
    }

    pub fn middle(&self) -> &RelayDescriptor {
        &self.hops[1]
    }

    pub fn exit(&self) -> &RelayDescriptor {
        &self.hops[ROUTE_LENGTH - 1]
    }

    /// Hops in client-to-exit order
    pub fn hops(&self) -> &[RelayDescriptor] {
        &self.hops
    }
}

/// Selection weight for a relay carrying `load` circuits. Negative loads count as zero.
pub fn relay_weight(load: i64) -> f64 {
    1.0 / (load.max(0) as f64 + LOAD_EPSILON)
}

/// Pick a route from the advertised relays
pub fn select_route<R: Rng + ?Sized>(
    relays: &[RelayDescriptor],
    rng: &mut R,
) -> Result<Route, CircuitError> {
    if relays.len() < ROUTE_LENGTH {
        return Err(CircuitError::InsufficientRelays {
            needed: ROUTE_LENGTH,
            available: relays.len(),
        });
    }

    let mut remaining: Vec<&RelayDescriptor> = relays.iter().collect();
    let mut picked = Vec::with_capacity(ROUTE_LENGTH);

    for _ in 0..ROUTE_LENGTH {
        let weights: Vec<f64> = remaining.iter().map(|r| relay_weight(r.load)).collect();
        let index = WeightedIndex::new(&weights)
            .map_err(|e| CircuitError::InvalidWeights(e.to_string()))?
            .sample(rng);
        picked.push(remaining.swap_remove(index).clone());
    }

    let exit = picked.pop();
    let middle = picked.pop();
    let entry = picked.pop();
    match (entry, middle, exit) {
        (Some(entry), Some(middle), Some(exit)) => Ok(Route::new(entry, middle, exit)),
        _ => Err(CircuitError::InsufficientRelays {
            needed: ROUTE_LENGTH,
            available: relays.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn relay(port: u16, load: i64) -> RelayDescriptor {
        RelayDescriptor {
            address: format!("127.0.0.1:{}", port),
            public_key: vec![2; 33],
            load,
        }
    }

    #[test]
    fn test_insufficient_relays() {
        let mut rng = StdRng::seed_from_u64(1);
        let relays = vec![relay(1, 0), relay(2, 0)];
        assert_eq!(
            select_route(&relays, &mut rng),
            Err(CircuitError::InsufficientRelays {
                needed: 3,
                available: 2
            })
        );
        assert!(select_route(&[], &mut rng).is_err());
    }

    #[test]
    fn test_no_repeated_relays() {
        let mut rng = StdRng::seed_from_u64(7);
        let relays: Vec<_> = (0..6).map(|i| relay(9000 + i, i as i64)).collect();

        for _ in 0..200 {
            let route = select_route(&relays, &mut rng).unwrap();
            let unique: HashSet<_> = route.hops().iter().map(|r| r.address.clone()).collect();
            assert_eq!(unique.len(), ROUTE_LENGTH);
        }
    }

    #[test]
    fn test_exactly_three_relays_all_used() {
        let mut rng = StdRng::seed_from_u64(3);
        let relays = vec![relay(1, 1), relay(2, 1), relay(3, 100)];
        let route = select_route(&relays, &mut rng).unwrap();
        let unique: HashSet<_> = route.hops().iter().map(|r| r.address.clone()).collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_heavily_loaded_relay_picked_last() {
        let mut rng = StdRng::seed_from_u64(42);
        let relays = vec![relay(1, 1), relay(2, 1), relay(3, 100)];

        let trials = 2000;
        let heavy_as_exit = (0..trials)
            .filter(|_| select_route(&relays, &mut rng).unwrap().exit().load == 100)
            .count();
        // ~98.5% expected
        assert!(heavy_as_exit as f64 / trials as f64 > 0.9);
    }

    #[test]
    fn test_heavy_relay_mostly_excluded() {
        let mut rng = StdRng::seed_from_u64(11);
        let relays = vec![relay(1, 0), relay(2, 0), relay(3, 0), relay(4, 1000)];

        let included = (0..500)
            .filter(|_| {
                select_route(&relays, &mut rng)
                    .unwrap()
                    .hops()
                    .iter()
                    .any(|r| r.load == 1000)
            })
            .count();
        assert!(included < 5);
    }

    #[test]
    fn test_negative_load_clamped() {
        assert_eq!(relay_weight(-5), relay_weight(0));
        assert!(relay_weight(0) > relay_weight(1));
        assert!(relay_weight(i64::MAX) > 0.0);
    }
}
