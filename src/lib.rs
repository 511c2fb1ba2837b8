//! tickstore - tick-level market data acquisition and reconciliation
//!
//! Ingests trade and quote ticks from a rate-limited upstream API, persists
//! them in SQLite, and reconciles what is already stored against what a
//! caller requests so nothing is fetched twice. Downstream consumers read
//! through [`services::accessors`]; everything they see is backed by durable
//! storage.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for binaries and tools embedding the engine.
///
/// Honors `RUST_LOG`; defaults to debug output for this crate.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickstore=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
