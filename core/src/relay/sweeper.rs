// Expiration sweeper — evicts circuits nobody has used within their lifetime

use super::context::RelayContext;
use super::table::CircuitTable;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// One sweep pass; returns the evicted circuit ids
pub fn sweep_once(table: &CircuitTable, now: Instant) -> Vec<u16> {
    let evicted = table.sweep(now);
    for id in &evicted {
        info!("Circuit {} expired", id);
    }
    if !evicted.is_empty() {
        debug!("Sweep evicted {} circuits, load now {}", evicted.len(), table.load());
    }
    evicted
}

/// Sweep `ctx.table` every `interval` until `shutdown` flips to true
pub fn spawn_sweeper(
    ctx: Arc<RelayContext>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_once(&ctx.table, Instant::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Sweeper stopped for {}", ctx.node_id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::OnionCell;
    use crate::crypto::RelayIdentity;
    use crate::directory::MemoryDirectory;
    use crate::relay::{CircuitInfo, RelayConfig};
    use crate::transport::LocalNetwork;

    fn create_cell(expiration: u32) -> OnionCell {
        OnionCell::create(
            1,
            "127.0.0.1:1".parse().unwrap(),
            2,
            2,
            expiration,
            [0u8; 16],
            false,
            Vec::new(),
        )
    }

    #[test]
    fn test_sweep_once() {
        let table = CircuitTable::new();
        let t0 = Instant::now();
        let peer = "127.0.0.1:2".parse().unwrap();
        table.insert(1, CircuitInfo::from_create(&create_cell(1), peer, t0));
        table.insert(2, CircuitInfo::from_create(&create_cell(10), peer, t0));

        assert_eq!(sweep_once(&table, t0 + Duration::from_secs(2)), vec![1]);
        assert_eq!(table.load(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_task_evicts_and_stops() {
        let ctx = Arc::new(
            RelayContext::new(
                "sweep-test",
                RelayIdentity::generate_x25519(),
                "127.0.0.1:9300".parse().unwrap(),
                Arc::new(MemoryDirectory::new()),
                Arc::new(LocalNetwork::new()),
                RelayConfig::default(),
            )
            .unwrap(),
        );
        let peer = "127.0.0.1:2".parse().unwrap();
        // Already past its deadline
        let past = Instant::now() - Duration::from_secs(5);
        ctx.table
            .insert(3, CircuitInfo::from_create(&create_cell(1), peer, past));

        let (tx, rx) = watch::channel(false);
        let task = spawn_sweeper(ctx.clone(), Duration::from_millis(20), rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!ctx.table.contains(3));
        assert_eq!(ctx.table.load(), 0);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
