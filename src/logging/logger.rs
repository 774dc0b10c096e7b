//! Level-filtered logger handles.
//!
//! A service builds one [`Logger`] at startup and passes it to whatever needs
//! to log; there is no process-global default.

use crate::logging::formatter::Formatter;
use crate::logging::level::Level;
use crate::logging::record::{LogPayload, Metadata, RequestLogRecord};
use crate::logging::sink::{LogEntry, LogSink};
use std::sync::Arc;

/// Application logger with a maximum-severity gate in front of its sink
#[derive(Clone)]
pub struct Logger {
    max_level: Level,
    formatter: Formatter,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(formatter: Formatter, max_level: Level, sink: Arc<dyn LogSink>) -> Self {
        Self {
            max_level,
            formatter,
            sink,
        }
    }

    pub fn max_level(&self) -> Level {
        self.max_level
    }

    pub fn service_name(&self) -> &str {
        self.formatter.service_name()
    }

    /// Emit one record if `level` passes the gate, or unconditionally when
    /// `bypass_level_check` is set. Returns whether the sink was called.
    ///
    /// The bypass is for records that were already filtered by the service
    /// that produced them and arrive here over the broker.
    pub fn log(
        &self,
        level: Level,
        payload: impl Into<LogPayload>,
        meta: Metadata,
        bypass_level_check: bool,
    ) -> bool {
        if !bypass_level_check && !self.max_level.admits(level) {
            return false;
        }

        let record = self.formatter.format(level, payload, meta);
        self.sink.write(&LogEntry::App(&record));
        true
    }

    pub fn error(&self, payload: impl Into<LogPayload>) -> bool {
        self.log(Level::Error, payload, Metadata::new(), false)
    }

    pub fn warn(&self, payload: impl Into<LogPayload>) -> bool {
        self.log(Level::Warn, payload, Metadata::new(), false)
    }

    pub fn info(&self, payload: impl Into<LogPayload>) -> bool {
        self.log(Level::Info, payload, Metadata::new(), false)
    }

    pub fn debug(&self, payload: impl Into<LogPayload>) -> bool {
        self.log(Level::Debug, payload, Metadata::new(), false)
    }
}

/// HTTP request logger. Request records are never level-gated.
#[derive(Clone)]
pub struct RequestLogger {
    formatter: Formatter,
    sink: Arc<dyn LogSink>,
}

impl RequestLogger {
    pub fn new(formatter: Formatter, sink: Arc<dyn LogSink>) -> Self {
        Self { formatter, sink }
    }

    pub fn write(&self, record: RequestLogRecord) {
        let record = self.formatter.format_request(record);
        self.sink.write(&LogEntry::Request(&record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::record::LogRecord;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture {
        app: Mutex<Vec<LogRecord>>,
        requests: Mutex<Vec<RequestLogRecord>>,
    }

    impl LogSink for Capture {
        fn write(&self, entry: &LogEntry<'_>) {
            match entry {
                LogEntry::App(record) => self.app.lock().push((*record).clone()),
                LogEntry::Request(record) => self.requests.lock().push((*record).clone()),
            }
        }
    }

    fn logger(max_level: Level) -> (Logger, Arc<Capture>) {
        let capture = Arc::new(Capture::default());
        let logger = Logger::new(Formatter::new("components"), max_level, capture.clone());
        (logger, capture)
    }

    #[test]
    fn test_warn_gate() {
        let (logger, capture) = logger(Level::Warn);

        assert!(!logger.debug("noise"));
        assert!(!logger.info("chatter"));
        assert!(capture.app.lock().is_empty());

        assert!(logger.warn("careful"));
        assert!(logger.error("broken"));
        assert_eq!(capture.app.lock().len(), 2);
    }

    #[test]
    fn test_bypass_ignores_gate() {
        let (logger, capture) = logger(Level::Error);
        assert!(logger.log(Level::Debug, "forwarded", Metadata::new(), true));

        let records = capture.app.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::Debug);
    }

    #[test]
    fn test_request_logger_always_writes() {
        let capture = Arc::new(Capture::default());
        let requests = RequestLogger::new(Formatter::new("gateway"), capture.clone());
        requests.write(RequestLogRecord {
            method: "POST".into(),
            url: "/incidents".into(),
            status: Some(201),
            ..Default::default()
        });

        let written = capture.requests.lock();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].service_name, "gateway");
        assert!(!written[0].timestamp.is_empty());
    }
}
