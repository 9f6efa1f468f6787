// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Build member state, bind the client listener and the cluster bus.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn the raft worker, discovery, the bus receiver and metrics.
    spawner::spawn_all(&mut server_context)?;

    // 3. Accept client connections until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
