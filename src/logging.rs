//! Log sink wiring for the simulator core.
//!
//! The core itself only ever calls `tracing::{trace,debug,info,warn,error}!`
//! with a `target` matching one of the §6 log categories (`SYSTEM`, `HAL`,
//! `BSP`, `L2`, `L3`, `SAI`, `CLI`, `DRIVER`, `TEST`). This module is the one
//! place that turns those events into output; everything else in the crate
//! is decoupled from how (or whether) logs are displayed.

use tracing_subscriber::EnvFilter;

/// Installs a global subscriber filtered at a single level for every
/// category. Safe to call once per process; a second call is a no-op rather
/// than a panic, since a failed log subsystem must never take down the
/// simulator (§7).
pub fn init(level: tracing::Level) {
    let filter = EnvFilter::new(level.to_string());
    install(filter);
}

/// Installs a global subscriber using a `tracing_subscriber::EnvFilter`
/// directive string, e.g. `"l3=debug,stp=trace,info"`, giving per-category
/// filtering (category names are lowercased module targets).
pub fn init_with_filter(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));
    install(filter);
}

fn install(filter: EnvFilter) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    // A second `set_global_default` call returns Err; that's expected in
    // tests that each call init(), and must not be treated as fatal.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
