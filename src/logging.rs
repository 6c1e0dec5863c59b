//! Tracing subscriber setup for the `nd` binary.
//!
//! Diagnostics go to stderr so that command output on stdout (including
//! `--json`) stays machine-readable.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "newsdesk=info,newsdesk_core=info,sqlx=warn";
const VERBOSE_FILTER: &str = "newsdesk=debug,newsdesk_core=debug,sqlx=warn";

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_logging(verbose: bool) -> Result<()> {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(fallback))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}
