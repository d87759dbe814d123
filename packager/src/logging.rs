//! Diagnostic logging set-up for the binaries.
//!
//! Diagnostics go through the `log` facade to stderr. `RUST_LOG` takes
//! precedence over the level chosen from the command line.

use log::LevelFilter;

/// The level implied by `-v` repetitions and `--quiet`.
///
/// `--quiet` silences progress output only; warnings about degraded builds
/// stay visible.
///
/// # Examples
///
/// ```
/// use abipack_packager::logging::level_for;
/// use log::LevelFilter;
///
/// assert_eq!(level_for(0, false), LevelFilter::Warn);
/// assert_eq!(level_for(2, false), LevelFilter::Debug);
/// assert_eq!(level_for(0, true), LevelFilter::Warn);
/// ```
#[must_use]
pub fn level_for(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Warn;
    }
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the stderr logger.
///
/// Calling this more than once is harmless; later calls leave the first
/// logger in place.
pub fn init_logging(verbosity: u8, quiet: bool) {
    let result = env_logger::Builder::new()
        .filter_level(level_for(verbosity, quiet))
        .parse_default_env()
        .format_timestamp(None)
        .format_target(false)
        .try_init();
    if result.is_err() {
        log::debug!("logger already initialised");
    }
}
