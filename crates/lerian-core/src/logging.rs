use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{Error, Result};

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Fails instead of
/// panicking when a subscriber is already installed.
pub fn init() -> Result<()> {
    init_with_default("info")
}

/// Like [`init`], with a custom directive used when `RUST_LOG` is unset.
pub fn init_with_default(default_directive: &str) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .compact();

    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| Error::Logging {
            message: e.to_string(),
        })?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Logging {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_error() {
        // Another test in this process may already have installed one
        let _ = init();
        assert!(matches!(init(), Err(Error::Logging { .. })));
        tracing::info!("logging initialized");
    }
}
