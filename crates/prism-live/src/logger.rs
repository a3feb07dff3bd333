//! Logging setup for Prism hosts.
//!
//! Installs a `tracing` subscriber with an [`EnvFilter`] and a compact fmt
//! layer. Verbosity resolves in this order:
//!
//! 1. `verbose`: debug for the Prism crates
//! 2. `quiet`: errors only
//! 3. `RUST_LOG`, when set
//! 4. info for the Prism crates
//!
//! ```rust,no_run
//! use prism_live::logger::{init_logger, should_use_colors};
//!
//! init_logger(false, false, !should_use_colors());
//! tracing::info!("dev server starting");
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const VERBOSE_FILTER: &str = "prism_core=debug,prism_live=debug,prism_config=debug";
const QUIET_FILTER: &str = "prism_core=error,prism_live=error,prism_config=error";
const DEFAULT_FILTER: &str = "prism_core=info,prism_live=info,prism_config=info";

/// Build the filter `init_logger` would install.
pub fn default_filter(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global subscriber. Call once, before anything logs.
///
/// `verbose` wins over `quiet`.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    init_logger_with_filter(default_filter(verbose, quiet), no_color);
}

/// Install the global subscriber with an explicit filter.
pub fn init_logger_with_filter(filter: EnvFilter, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .compact();

    // A host or test harness may have installed a subscriber already.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

/// Whether colored output should be used.
///
/// `NO_COLOR` disables colors, `FORCE_COLOR` forces them; otherwise the
/// terminal's capabilities decide.
pub fn should_use_colors() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    console::Term::stderr().features().colors_supported()
}
