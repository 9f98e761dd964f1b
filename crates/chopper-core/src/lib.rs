// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Same as [`init_tracing`], but uses `default_directive` when `RUST_LOG` is unset.
/// Calling it again after a subscriber is installed does nothing.
pub fn init_tracing_with(default_directive: &str) {
    let _ = fmt()
        .with_env_filter(env_filter_or(default_directive))
        .with_target(false)
        .compact()
        .try_init();
}

fn env_filter_or(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
