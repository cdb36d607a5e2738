//! Logging interface for sector_store.
//!
//! Provides a simple, adaptable logging interface so the store can report
//! maintenance decisions (insert/shift/erase/defragment) without binding
//! callers to a particular logging backend.

use std::fmt;

/// Simple logging interface.
///
/// Lets the crate run standalone (via [`NoOpLog`]) or forward into whatever
/// logging setup the embedding application already has.
pub trait Log: Send + Sync {
    /// Log an info-level message (maintenance tick summaries).
    fn info(&self, message: &str);

    /// Log a debug-level message (per-operation decisions).
    fn debug(&self, message: &str);

    /// Log a warning (e.g. a defragment pass aborted on a pin conflict).
    fn warn(&self, message: &str);

    /// Whether debug logging is enabled, so callers can skip formatting work.
    fn is_debug_enabled(&self) -> bool;
}

/// No-operation logger, the default for stores constructed without one.
pub struct NoOpLog;

impl Log for NoOpLog {
    fn info(&self, _message: &str) {}
    fn debug(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn is_debug_enabled(&self) -> bool {
        false
    }
}

/// Logger that forwards into the `log` crate's global facade.
pub struct FacadeLog;

impl Log for FacadeLog {
    fn info(&self, message: &str) {
        log::info!("{}", message);
    }

    fn debug(&self, message: &str) {
        log::debug!("{}", message);
    }

    fn warn(&self, message: &str) {
        log::warn!("{}", message);
    }

    fn is_debug_enabled(&self) -> bool {
        log::log_enabled!(log::Level::Debug)
    }
}

/// Logger that prefixes every message, useful when one process owns several
/// stores and wants to tell their maintenance logs apart.
pub struct PrefixedLog {
    prefix: String,
    base_log: Box<dyn Log>,
}

impl PrefixedLog {
    pub fn new(prefix: impl Into<String>, base_log: Box<dyn Log>) -> Self {
        Self {
            prefix: prefix.into(),
            base_log,
        }
    }
}

impl Log for PrefixedLog {
    fn info(&self, message: &str) {
        self.base_log.info(&format!("[{}] {}", self.prefix, message));
    }

    fn debug(&self, message: &str) {
        self.base_log
            .debug(&format!("[{}] {}", self.prefix, message));
    }

    fn warn(&self, message: &str) {
        self.base_log.warn(&format!("[{}] {}", self.prefix, message));
    }

    fn is_debug_enabled(&self) -> bool {
        self.base_log.is_debug_enabled()
    }
}

impl fmt::Debug for PrefixedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixedLog")
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Factory functions for creating loggers.
pub mod factory {
    use super::*;

    /// A logger that discards everything.
    pub fn no_op() -> Box<dyn Log> {
        Box::new(NoOpLog)
    }

    /// A logger that forwards into the `log` crate.
    pub fn facade() -> Box<dyn Log> {
        Box::new(FacadeLog)
    }

    /// Wrap a logger with a prefix.
    pub fn with_prefix(prefix: impl Into<String>, base_log: Box<dyn Log>) -> Box<dyn Log> {
        Box::new(PrefixedLog::new(prefix, base_log))
    }
}
