//! Optional `tracing` subscriber bootstrap for binaries and tests.

use tracing_subscriber::EnvFilter;

use crate::errors::{HvError, HvResult};

/// Install a `fmt` subscriber filtered by `RUST_LOG`, or by `default_directive`
/// when `RUST_LOG` is unset (e.g. `"hv_blob=debug,hv_auth=info"`).
pub fn init_tracing(default_directive: &str) -> HvResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| HvError::config(format!("invalid tracing directive: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| HvError::config(format!("tracing subscriber already installed: {e}")))
}
