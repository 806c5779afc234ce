pub mod carrier;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod provider;
pub mod store;
pub mod sync;
pub mod types;
