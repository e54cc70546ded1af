//! Logging and tracing configuration
//!
//! The walkers log through the `tracing` crate; this module only installs a
//! subscriber for binaries and tests that embed the engine.
//!
//! ```rust,ignore
//! evidence_walk::logging::init();
//! ```
//!
//! # Log Levels
//!
//! - `error` - Walks or ingestion runs that failed
//! - `warn`  - Absorbed failures (unreadable partitions, skipped records)
//! - `info`  - Walk and ingestion summaries
//! - `debug` - Opened volume systems, file systems and containers
//! - `trace` - Every visited entry
//!
//! # Environment Variable Control
//!
//! ```bash
//! RUST_LOG=evidence_walk=trace          # Every entry
//! RUST_LOG=evidence_walk::walker=debug  # Walker only
//! RUST_LOG=warn                         # Absorbed failures and errors
//! ```

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging/tracing system
///
/// Call once at startup. A second call is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("evidence_walk=debug")
        } else {
            EnvFilter::new("evidence_walk=info")
        }
    });

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Check if trace logging is enabled
/// Used to skip building per-entry log fields
#[inline]
pub fn is_trace_enabled() -> bool {
    tracing::enabled!(Level::TRACE)
}
