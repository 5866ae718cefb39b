//! Structured logging setup shared by every crate in the workspace, matching the
//! teacher's `slog` + `slog-term` + `slog-async` stack. The broker logs leveled,
//! key-value structured events (`"broker_id" => ..., "topic" => ..., "peer" => ...`)
//! in place of the original Python broker's emoji `print()` calls.

use slog::{o, Drain, Level, Logger};
use std::str::FromStr;

/// Builds the process-wide root logger. `verbosity` follows the common
/// `RUST_LOG`-style convention: one of `trace`, `debug`, `info`, `warn`, `error`,
/// `critical`, defaulting to `info` on anything unrecognized.
pub fn root_logger(verbosity: &str) -> Logger {
    let level = Level::from_str(verbosity).unwrap_or(Level::Info);

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Logger::root(drain, o!())
}

/// A logger that drops everything, for use in unit tests that don't care about output.
pub fn test_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}
