//! Daemon command handler.
//!
//! Runs the daily scheduler and, optionally, the health endpoint. Ctrl-C
//! cancels both; a pass in progress finishes its current merges.

use std::path::Path;

use tracing::info;

use super::build_engine;
use super::sync::cancel_on_ctrl_c;
use crate::cli::SyncArgs;
use crate::health::{run_health_server, HealthState};
use crate::sync::SyncScheduler;

/// Run the scheduler until Ctrl-C.
///
/// # Errors
/// Returns error if the engine cannot be built.
pub async fn run_daemon(orders: &Path, health_port: Option<u16>, args: &SyncArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _) = build_engine(orders, args)?;
    let scheduler = SyncScheduler::new(engine);
    let cancel = cancel_on_ctrl_c();

    info!("--- shipsync: daemon mode ---");

    let health = health_port.map(|port| {
        let state = HealthState::new(scheduler.status());
        tokio::spawn(run_health_server(port, state, cancel.clone()))
    });

    scheduler.run(cancel.clone()).await;

    if let Some(handle) = health {
        cancel.cancel();
        let _ = handle.await;
    }
    info!("Daemon stopped");
    Ok(())
}
