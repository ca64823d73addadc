//! # Observability & Tracing
//!
//! [`setup_tracing`] installs the global `tracing` subscriber once, at process start.
//!
//! ## Configuration
//!
//! - `RUST_LOG` wins when set; otherwise `log.level` from [`LogConfig`] is the filter.
//! - Text output is compact and hides the module prefix (`with_target(false)`).
//! - `log.json: true` switches to one JSON object per line, target included, for log shippers.
//!
//! ## What Gets Traced
//!
//! - **Requests**: `tower-http` opens an `info` span per request and logs its status and latency.
//!   Inside it every [`ResourceService`](crate::framework::ResourceService) operation runs in a
//!   span carrying the `collection`; creates, updates and deletes log the `id` they touched.
//! - **Panics**: a panicking handler is logged at `error` and answered with a `500`.
//! - **Transactions**: retries and aborts are logged with the `attempt` number.
//! - **Scheduler**: each batch run logs the `matched` count, or the error that ended it.
//! - **Rejections**: 4xx responses log at `warn`, 5xx at `error`.
//!
//! ```bash
//! # Compact logs (default)
//! RUST_LOG=info cargo run
//!
//! # Request payloads (user passwords are redacted)
//! RUST_LOG=debug cargo run
//!
//! # Without the per-request access log
//! RUST_LOG=info,tower_http=warn cargo run
//!
//! # Only the store engine
//! RUST_LOG=storefront::store=debug cargo run
//! ```
//!
//! Payloads are logged once with `?` at `debug`:
//!
//! ```rust,ignore
//! debug!(?params, "create called");
//! ```

use crate::config::LogConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Builds the filter: `RUST_LOG` if set and valid, else the configured level.
pub fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

pub fn setup_tracing(config: &LogConfig) {
    let registry = tracing_subscriber::registry().with(env_filter(config));
    if config.json {
        registry
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).compact())
            .init();
    }
}
