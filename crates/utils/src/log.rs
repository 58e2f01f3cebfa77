//! Tracing subscriber setup shared by portal-core binaries.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default directive used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Install a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// `verbose` raises the portal-core crates to `debug` on top of whatever the
/// environment asks for. Calling this twice is harmless: the second install
/// fails quietly and the first subscriber stays in place.
pub fn init_tracing(verbose: bool) {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if verbose {
        for krate in ["portal_core_utils", "portal_core_db", "portal_core_services"] {
            if let Ok(directive) = format!("{krate}=debug").parse() {
                filter = filter.add_directive(directive);
            }
        }
    }

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
