//! Structured logging for spotbot
//!
//! Tag + level logging with:
//! - Standard levels (Error/Warning/Info/Debug/Verbose)
//! - Per-module debug control via --debug-<tag> flags
//! - Dual output: colored console + file under data/logs/
//!
//! ## Usage
//!
//! ```rust
//! use spotbot::logger::{self, LogTag};
//!
//! logger::error(LogTag::Gateway, "request failed");
//! logger::warning(LogTag::Engine, "position without balance, dropping");
//! logger::info(LogTag::Engine, "position opened");
//! logger::debug(LogTag::Gateway, "klines response: ..."); // only with --debug-gateway
//! ```
//!
//! Call `logger::init()` once at startup before any logging occurs.

mod core;
mod levels;
mod tags;

pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger: parse --debug-<tag>/--verbose/--quiet from the
/// command line and open the log file.
pub fn init() {
    core::init_from_args();
    core::init_file_output();
}

/// ERROR level, always shown.
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// WARNING level, shown unless --quiet.
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// INFO level, standard operations.
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// DEBUG level, only with the matching --debug-<tag> flag.
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// VERBOSE level, only with --verbose.
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Flush pending file writes. Call during shutdown.
pub fn flush() {
    core::flush_file_output();
}
