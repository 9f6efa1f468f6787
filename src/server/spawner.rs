// src/server/spawner.rs

//! Spawns all of the member's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use tracing::info;

/// Spawns all critical background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) -> anyhow::Result<()> {
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Metrics Server ---
    if ctx.config.metrics.enabled {
        let metrics_state = ctx.state.clone();
        let port = ctx.config.metrics.port;
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, port, shutdown_rx_metrics).await
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Cluster Bus ---
    let bus = ctx.bus.clone();
    let inbound = ctx.inbound.clone();
    let shutdown_rx_bus = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        bus.run_receiver(inbound, shutdown_rx_bus).await;
        Ok(())
    });

    // --- Discovery ---
    let discovery = ctx.discovery.clone();
    let shutdown_rx_discovery = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        discovery.run(shutdown_rx_discovery).await;
        Ok(())
    });

    // --- Raft ---
    match ctx.raft_worker.take() {
        Some(worker) => {
            let shutdown_rx_raft = shutdown_tx.subscribe();
            background_tasks.spawn(async move {
                worker.run(shutdown_rx_raft).await;
                Ok(())
            });
        }
        None => info!("Edge member: no raft worker to start."),
    }

    info!("All background tasks have been spawned.");
    Ok(())
}
