//! One-shot sync command handlers.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::build_engine;
use crate::cli::SyncArgs;
use crate::store::OrderStore;
use crate::sync::SyncSummary;
use crate::types::OrderId;

/// Sync every active order in the orders file once.
///
/// Ctrl-C stops polling; merges already applied stay saved.
///
/// # Errors
/// Returns error if setup fails or any sub-batch failed.
pub async fn run_sync_all(orders: &Path, args: &SyncArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _) = build_engine(orders, args)?;
    let cancel = cancel_on_ctrl_c();

    let summary = engine.sync_all(&cancel).await?;
    report(&summary);
    if summary.is_success() {
        Ok(())
    } else {
        Err(format!("{} of the sync units failed", summary.error_count).into())
    }
}

/// Sync one order by id and print its resulting state.
///
/// # Errors
/// Returns error if the order is unknown or its sync fails.
pub async fn run_sync_one(orders: &Path, id: &str, args: &SyncArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, store) = build_engine(orders, args)?;
    let order = store.get(&OrderId::new(id)).await?;
    let cancel = cancel_on_ctrl_c();

    let synced = engine.sync_one(&order, &cancel).await?;
    println!(
        "{} {} status={} warning={} events={}",
        synced.id,
        synced.tracking_number,
        synced.status,
        synced.warning_status,
        synced.timeline.len()
    );
    Ok(())
}

fn report(summary: &SyncSummary) {
    info!(
        succeeded = summary.success_count,
        failed = summary.error_count,
        updated = summary.orders_updated,
        skipped = summary.records_skipped,
        "Sync finished"
    );
    for failure in &summary.errors {
        warn!(context = %failure.context, error = %failure.message, "Sync failure");
    }
}

/// Token cancelled by the first Ctrl-C.
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling sync");
            token.cancel();
        }
    });
    cancel
}
