//! CLI command handlers.
//!
//! Each handler builds its collaborators from configuration and delegates
//! to the sync engine.

mod daemon;
mod recognize;
mod sync;

pub use daemon::run_daemon;
pub use recognize::run_recognize;
pub use sync::{run_sync_all, run_sync_one};

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::cli::SyncArgs;
use crate::config::ProviderConfig;
use crate::provider::HttpTrackingProvider;
use crate::store::JsonFileOrderStore;
use crate::sync::SyncEngine;

/// Build an engine backed by the orders file and the HTTP provider.
///
/// The store handle is returned too so handlers can read orders through
/// the same cache the engine writes to.
///
/// # Errors
/// Returns error if flags are out of range, the orders file is unreadable,
/// or provider credentials are missing.
pub(crate) fn build_engine(orders: &Path, args: &SyncArgs) -> Result<(SyncEngine, Arc<JsonFileOrderStore>), Box<dyn std::error::Error>> {
    let config = args.to_config()?;
    let store = Arc::new(JsonFileOrderStore::open(orders)?);
    let provider = HttpTrackingProvider::new(ProviderConfig::from_env()?)?;

    info!(
        orders_file = %orders.display(),
        batch_size = config.batch_size,
        max_concurrent = config.max_concurrent_tasks,
        "Sync engine ready"
    );
    let engine = SyncEngine::new(store.clone(), Arc::new(provider), config);
    Ok((engine, store))
}
