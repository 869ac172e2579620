//! Application logging hook and reporting of malformed device data.
//!
//! Malformed data is never surfaced to callers as an error. It is emitted as a
//! `tracing` warning, counted, and forwarded to the logging hook an
//! application may install on a session.

use std::{
    fmt,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::warn;

/// A logging hook receiving formatted log lines.
///
/// Any state the hook needs is captured by the closure.
pub type Logger = Box<dyn Fn(&str) + Send + Sync>;

/// Shared diagnostics state of a session.
#[derive(Default)]
pub struct Diagnostics {
    /// The installed logging hook, if any.
    logger: RwLock<Option<Logger>>,

    /// The number of malformed-data events seen so far.
    malformed: AtomicU64,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("has_logger", &self.has_logger())
            .field("malformed", &self.malformed_count())
            .finish()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a logging hook, replacing a previously installed one.
    pub fn set_logger(&self, logger: Logger) {
        *self.logger.write().unwrap_or_else(PoisonError::into_inner) = Some(logger);
    }

    /// Removes the logging hook.
    pub fn clear_logger(&self) {
        *self.logger.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_logger(&self) -> bool {
        self.logger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Writes a line through the logging hook.
    ///
    /// Returns `false` if no hook is installed.
    pub fn log(&self, args: fmt::Arguments<'_>) -> bool {
        let guard = self.logger.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(logger) => {
                logger(&args.to_string());
                true
            },
            None => false,
        }
    }

    /// Reports malformed data found by `handler`.
    ///
    /// `value` and `expected` carry the offending and the expected quantity
    /// where the check has them, zero otherwise.
    pub fn bad_data(&self, handler: &'static str, reason: &'static str, value: i64, expected: i64) {
        warn!(handler, reason, value, expected, "malformed device data");
        self.malformed.fetch_add(1, Ordering::Relaxed);
        self.log(format_args!(
            "{handler}: {reason} (value {value}, expected {expected})"
        ));
    }

    /// The number of malformed-data events reported since creation.
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn log_without_hook_reports_false() {
        let diag = Diagnostics::new();
        assert!(!diag.log(format_args!("nobody listens")));
    }

    #[test]
    fn bad_data_reaches_hook_and_counter() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let diag = Diagnostics::new();
        diag.set_logger(Box::new({
            let lines = Arc::clone(&lines);
            move |line| lines.lock().unwrap().push(line.to_owned())
        }));

        diag.bad_data("finger", "too many fingers", 12, 10);
        assert_eq!(diag.malformed_count(), 1);
        assert_eq!(
            lines.lock().unwrap().as_slice(),
            ["finger: too many fingers (value 12, expected 10)"]
        );

        diag.clear_logger();
        assert!(!diag.log(format_args!("dropped")));
        assert_eq!(lines.lock().unwrap().len(), 1);
    }
}
