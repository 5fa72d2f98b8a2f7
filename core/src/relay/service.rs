// Relay service — runs a relay: listener plus its background tasks
//
// Tasks started by `RelayService::start`:
//   keep-alive  republish the descriptor (with current load) every half lease
//   sweeper     evict expired circuits
//   padding     send cover cells to random peers (if enabled)
// `serve_tcp` adds the inbound listener. All of them stop on `shutdown`.

use super::context::RelayContext;
use super::engine::RelayEngine;
use super::sweeper::spawn_sweeper;
use super::RelayError;
use crate::privacy::cover::spawn_padding;
use crate::transport::tcp;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Refresh the directory lease every `interval`
pub fn spawn_keepalive(
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
                    match ctx.publish().await {
                        Ok(()) => debug!("Lease refreshed for {} (load {})", ctx.node_id, ctx.table.load()),
                        Err(e) => warn!("Lease refresh failed for {}: {}", ctx.node_id, e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

pub struct RelayService {
    ctx: Arc<RelayContext>,
    engine: Arc<RelayEngine>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayService {
    /// Publish the descriptor and start the background tasks
    pub async fn start(ctx: Arc<RelayContext>) -> Result<Self, RelayError> {
        ctx.publish().await?;
        info!(
            "Relay {} registered at {} ({} headers)",
            ctx.node_id,
            ctx.address,
            ctx.identity.scheme()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = vec![
            spawn_keepalive(
                ctx.clone(),
                ctx.config.keepalive_interval(),
                shutdown_rx.clone(),
            ),
            spawn_sweeper(ctx.clone(), ctx.config.sweep_interval(), shutdown_rx.clone()),
        ];
        if ctx.config.padding.enabled {
            tasks.push(spawn_padding(ctx.clone(), shutdown_rx));
        }

        Ok(Self {
            engine: Arc::new(RelayEngine::new(ctx.clone())),
            ctx,
            shutdown_tx,
            tasks,
        })
    }

    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    /// Inbound handler for this relay, for whichever transport binding is used
    pub fn engine(&self) -> Arc<RelayEngine> {
        self.engine.clone()
    }

    /// Serve the engine on `listener` until shutdown
    pub fn serve_tcp(&mut self, listener: TcpListener) {
        let engine = self.engine.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = tcp::serve(listener, engine, shutdown).await {
                error!("Relay listener failed: {}", e);
            }
        }));
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop every task and withdraw the descriptor
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Relay task ended abnormally: {}", e);
            }
        }
        if let Err(e) = self.ctx.directory.remove(&self.ctx.directory_key()).await {
            warn!("Could not withdraw {} from directory: {}", self.ctx.node_id, e);
        }
        info!("Relay {} stopped", self.ctx.node_id);
    }
}
