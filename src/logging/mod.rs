//! Logging setup and helpers.
//!
//! - `init_tracing` - installs the fmt subscriber used by the binary
//! - `LogThrottle` - suppresses repeated warnings from tight retry loops

pub mod throttle;

pub use throttle::LogThrottle;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (e.g. "info") applies.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(default_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()?;

    Ok(())
}
