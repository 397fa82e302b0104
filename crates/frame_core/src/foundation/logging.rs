//! Logging utilities
//!
//! The crate logs through the `log` facade; binaries pick the backend.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
///
/// Honors `RUST_LOG`; defaults to `info` when unset.
pub fn init() {
    let env = env_logger::Env::default().default_filter_or("info");
    // A second init from tests or embedding hosts is harmless
    let _ = env_logger::Builder::from_env(env).try_init();
}
