//! Logging helpers
//!
//! Output goes through the `log` facade; the embedding kernel installs
//! the logger. The `verbose` feature turns on per-entry tracing and the
//! `debug` feature escalates `pt_warn_on!` hits to errors.

/// Log a should-never-happen condition and evaluate to it
///
/// ```ignore
/// if pt_warn_on!(level == 0) {
///     return Err(Error::InconsistentState);
/// }
/// ```
#[macro_export]
macro_rules! pt_warn_on {
    ($cond:expr) => {{
        let hit: bool = $cond;
        if hit {
            $crate::utils::log::report_warn_on(stringify!($cond), file!(), line!());
        }
        hit
    }};
}

/// Trace a single entry write, compiled out unless `verbose` is enabled
#[macro_export]
macro_rules! pt_trace {
    ($($arg:tt)*) => {
        if $crate::utils::log::VERBOSE {
            ::log::trace!($($arg)*);
        }
    };
}

cfg_if::cfg_if! {
    if #[cfg(feature = "verbose")] {
        /// Per-entry tracing is enabled
        pub const VERBOSE: bool = true;
    } else {
        /// Per-entry tracing is disabled
        pub const VERBOSE: bool = false;
    }
}

#[doc(hidden)]
#[cold]
pub fn report_warn_on(cond: &str, file: &str, line: u32) {
    cfg_if::cfg_if! {
        if #[cfg(feature = "debug")] {
            ::log::error!("pt_warn_on({}) hit at {}:{}", cond, file, line);
        } else {
            ::log::warn!("pt_warn_on({}) hit at {}:{}", cond, file, line);
        }
    }
}
