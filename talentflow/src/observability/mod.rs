//! Tracing setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber, honoring `RUST_LOG`.
///
/// Safe to call more than once; only the first call installs.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing("talentflow=debug");
        init_tracing("talentflow=info");
    }
}
