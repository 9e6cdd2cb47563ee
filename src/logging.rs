//! Logging setup.
//!
//! Reconciliation passes log through `tracing`: one span per pass carrying
//! the port id. Batch submissions and finished passes log at `info`,
//! incomplete resets at `warn`, and single steps and batch polls at
//! `debug`. Output goes to **stderr**; stdout is left to the host.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `equinix_metal_provider=debug`)
//!
//! # Examples
//!
//! ```bash
//! # Follow every batch poll
//! RUST_LOG=equinix_metal_provider::metal::executor=debug ./my-provider
//!
//! # Only warnings, e.g. incomplete resets
//! RUST_LOG=warn ./my-provider
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the default logging subscriber.
///
/// Respects `RUST_LOG` and defaults to `info` when it is not set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level.
///
/// Like [`init_logging`], but `default_level` is used if `RUST_LOG` is not set.
///
/// # Example
///
/// ```ignore
/// use equinix_metal_provider::init_logging_with_default;
///
/// fn main() {
///     init_logging_with_default("equinix_metal_provider=debug,info");
/// }
/// ```
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if already initialized.
///
/// Unlike [`init_logging`], this does not panic when a subscriber is
/// already set, which makes it usable from tests.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}
