//! Logging setup shared by every crate in the workspace: an `EnvFilter`
//! plus the `fmt` layer, no exporter. A host process calls [`init`] once
//! at startup; every subsystem here emits through `tracing` without
//! caring whether a subscriber was ever installed.

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Install the global subscriber. Filtering is controlled by `RUST_LOG`;
/// absent that, everything at `info` and above is emitted.
///
/// A second call in the same process is a silent no-op rather than a
/// panic, since more than one test binary may try to install a
/// subscriber over the course of a test run.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt::layer().with_target(true));
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_and_never_panics() {
        init();
        init();
    }
}
