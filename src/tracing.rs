use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

use crate::conf;

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured `log_level`.
pub fn init() -> anyhow::Result<()> {
    let level = conf::global().log_level;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| anyhow!("Failed to init tracing: {error}"))?;
    Ok(())
}
