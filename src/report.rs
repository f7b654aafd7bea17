//! Logging and hint collaborator injected into every component.
//!
//! Components never reach for a process-wide logger of their own; they are
//! handed an `Arc<dyn Reporter>` at construction and emit both log records and
//! operator-facing hint strings through it.

use log::Level;

/// Sink for structured log records and plain-text hints.
pub trait Reporter: Send + Sync {
    /// Emit a log record.
    fn log(&self, level: Level, message: &str);

    /// Emit an operator-facing hint. Implementations decide whether hints are shown.
    fn hint(&self, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// Reporter backed by the `log` facade, printing hints to stdout when enabled.
#[derive(Debug, Clone, Default)]
pub struct LogReporter {
    print_hints: bool,
}

impl LogReporter {
    pub fn new(print_hints: bool) -> Self {
        Self { print_hints }
    }

    pub fn prints_hints(&self) -> bool {
        self.print_hints
    }
}

impl Reporter for LogReporter {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: "portalauth", level, "{message}");
    }

    fn hint(&self, message: &str) {
        if self.print_hints && !message.is_empty() {
            println!("{message}");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryReporter;
    use super::*;

    #[test]
    fn test_default_helpers_route_levels() {
        let reporter = MemoryReporter::default();
        reporter.warn("duplicated session");
        reporter.debug("probe sent");

        let logs = reporter.logs.lock().unwrap();
        assert_eq!(logs[0], (Level::Warn, "duplicated session".to_string()));
        assert_eq!(logs[1].0, Level::Debug);
    }

    #[test]
    fn test_log_reporter_hint_toggle() {
        assert!(!LogReporter::default().prints_hints());
        assert!(LogReporter::new(true).prints_hints());
    }
}
