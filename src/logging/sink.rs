//! Log sinks: where accepted records go

use crate::logging::error::LoggingResult;
use crate::logging::level::Level;
use crate::logging::record::{LogRecord, RequestLogRecord};
use crate::messaging::{Binder, Payload, PublishOptions};

/// Routing key for application records
pub const APP_ROUTING_KEY: &str = "app";

/// Routing key for HTTP request records
pub const REQUEST_ROUTING_KEY: &str = "request";

/// A record on its way to a sink
#[derive(Debug, Clone, Copy)]
pub enum LogEntry<'a> {
    App(&'a LogRecord),
    Request(&'a RequestLogRecord),
}

impl LogEntry<'_> {
    pub fn routing_key(&self) -> &'static str {
        match self {
            LogEntry::App(_) => APP_ROUTING_KEY,
            LogEntry::Request(_) => REQUEST_ROUTING_KEY,
        }
    }
}

/// Receives every record a logger accepts. Sinks swallow their own failures.
pub trait LogSink: Send + Sync {
    fn write(&self, entry: &LogEntry<'_>);
}

/// A single output destination
pub trait LogWriter: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    fn write(&self, entry: &LogEntry<'_>) -> LoggingResult<()>;
}

/// Sends each record to every writer whose own level admits it.
///
/// Request records carry no severity and reach every writer. A failing writer
/// is reported through `tracing` and does not stop the others.
#[derive(Default)]
pub struct FanOut {
    writers: Vec<(Level, Box<dyn LogWriter>)>,
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOut")
            .field(
                "writers",
                &self
                    .writers
                    .iter()
                    .map(|(level, writer)| (*level, writer.name()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `writer`, emitting application records up to `level`
    pub fn with_writer(mut self, level: Level, writer: Box<dyn LogWriter>) -> Self {
        self.writers.push((level, writer));
        self
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

impl LogSink for FanOut {
    fn write(&self, entry: &LogEntry<'_>) {
        for (level, writer) in &self.writers {
            if let LogEntry::App(record) = entry {
                if !level.admits(record.level) {
                    continue;
                }
            }

            if let Err(e) = writer.write(entry) {
                tracing::warn!(writer = writer.name(), error = %e, "Log writer failed, record dropped");
            }
        }
    }
}

/// Publishes records to the log exchange, routed by record kind.
///
/// Fire-and-forget: the record is serialized immediately, the publish runs on
/// a spawned task and failures are only logged.
#[derive(Clone)]
pub struct BrokerSink {
    binder: Binder,
    exchange: String,
}

impl BrokerSink {
    pub fn new(binder: Binder, exchange: impl Into<String>) -> Self {
        Self {
            binder,
            exchange: exchange.into(),
        }
    }
}

impl LogSink for BrokerSink {
    fn write(&self, entry: &LogEntry<'_>) {
        let payload = match entry {
            LogEntry::App(record) => Payload::json(record),
            LogEntry::Request(record) => Payload::json(record),
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Could not serialize log record");
                return;
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime available, log record dropped");
            return;
        };

        let binder = self.binder.clone();
        let exchange = self.exchange.clone();
        let options = PublishOptions::with_routing_key(entry.routing_key());
        runtime.spawn(async move {
            if let Err(e) = binder.publish(payload, &exchange, &options).await {
                tracing::warn!(exchange = %exchange, routing_key = %options.routing_key, error = %e, "Failed to publish log record");
            }
        });
    }
}
