//! Log aggregator.
//!
//! Consumes the `applog` and `reqlog` queues bound to the `logs` exchange and
//! re-emits every record through local loggers. Producers already applied
//! their own level gate, so application records are re-emitted with the gate
//! bypassed and only the per-writer levels apply.

use crate::logging::{LogPayload, Logger, Metadata, RequestLogRecord, RequestLogger, Level};
use crate::logging::{APP_ROUTING_KEY, REQUEST_ROUTING_KEY};
use crate::messaging::{
    Binder, ExchangeOptions, MessagingResult, Payload, SubscribeOptions, LOG_EXCHANGE,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumIter, IntoEnumIterator};

/// Record kinds carried over the log exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum LogKind {
    App,
    Request,
}

impl LogKind {
    pub fn routing_key(self) -> &'static str {
        match self {
            LogKind::App => APP_ROUTING_KEY,
            LogKind::Request => REQUEST_ROUTING_KEY,
        }
    }
}

/// Per-kind consumer state. `Bound` lasts until shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Idle,
    Bound,
}

/// Exchange and queue names the aggregator consumes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueNames {
    pub exchange: String,
    pub app_queue: String,
    pub request_queue: String,
}

impl QueueNames {
    /// Queue names prefixed with the consuming service, e.g. `logger-applog`
    pub fn for_service(service: &str) -> Self {
        Self {
            app_queue: format!("{}-applog", service),
            request_queue: format!("{}-reqlog", service),
            ..Self::default()
        }
    }

    pub fn queue(&self, kind: LogKind) -> &str {
        match kind {
            LogKind::App => &self.app_queue,
            LogKind::Request => &self.request_queue,
        }
    }
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            exchange: LOG_EXCHANGE.to_string(),
            app_queue: "applog".to_string(),
            request_queue: "reqlog".to_string(),
        }
    }
}

struct Inner {
    binder: Binder,
    queues: QueueNames,
    logger: Logger,
    request_logger: RequestLogger,
    states: Mutex<HashMap<LogKind, BindingState>>,
}

/// Subscribes to the log exchange and fans inbound records out locally
#[derive(Clone)]
pub struct LogAggregator {
    inner: Arc<Inner>,
}

impl LogAggregator {
    pub fn new(
        binder: Binder,
        queues: QueueNames,
        logger: Logger,
        request_logger: RequestLogger,
    ) -> Self {
        let states = LogKind::iter().map(|kind| (kind, BindingState::Idle)).collect();
        Self {
            inner: Arc::new(Inner {
                binder,
                queues,
                logger,
                request_logger,
                states: Mutex::new(states),
            }),
        }
    }

    pub fn state(&self, kind: LogKind) -> BindingState {
        self.inner
            .states
            .lock()
            .get(&kind)
            .copied()
            .unwrap_or(BindingState::Idle)
    }

    pub fn queues(&self) -> &QueueNames {
        &self.inner.queues
    }

    /// Declare the exchange and bind both queues. Kinds already bound are
    /// left alone, so a failed start can be retried.
    pub async fn start(&self) -> MessagingResult<()> {
        let exchange = &self.inner.queues.exchange;
        self.inner
            .binder
            .create_exchange(exchange, &ExchangeOptions::default())
            .await?;

        for kind in LogKind::iter() {
            if self.state(kind) == BindingState::Bound {
                continue;
            }
            self.bind(kind).await?;
        }
        Ok(())
    }

    async fn bind(&self, kind: LogKind) -> MessagingResult<()> {
        let queue = self.inner.queues.queue(kind).to_string();
        let options = SubscribeOptions::bound_to(self.inner.queues.exchange.clone(), kind.routing_key());

        let aggregator = self.clone();
        self.inner
            .binder
            .subscribe(&queue, &options, move |payload: Payload| {
                let aggregator = aggregator.clone();
                async move {
                    match kind {
                        LogKind::App => aggregator.handle_app(payload),
                        LogKind::Request => aggregator.handle_request(payload),
                    };
                }
            })
            .await?;

        self.inner.states.lock().insert(kind, BindingState::Bound);
        tracing::info!(kind = %kind, queue = %queue, routing_key = kind.routing_key(), "Log queue bound");
        Ok(())
    }

    /// Re-emit an application record. Returns whether it was written; records
    /// that are not objects or carry an unknown level are dropped.
    pub fn handle_app(&self, payload: Payload) -> bool {
        let Some(fields) = payload.as_object() else {
            return false;
        };
        let Some(level) = fields
            .get("level")
            .and_then(Value::as_str)
            .and_then(|level| Level::from_str(level).ok())
        else {
            return false;
        };

        let message = fields
            .get("message")
            .cloned()
            .map(LogPayload::from)
            .unwrap_or_else(|| LogPayload::Text(String::new()));
        let meta = match fields.get("meta") {
            Some(Value::Object(meta)) => meta.clone(),
            _ => Metadata::new(),
        };

        self.inner.logger.log(level, message, meta, true)
    }

    /// Re-emit a request record. Returns whether it was written.
    pub fn handle_request(&self, payload: Payload) -> bool {
        let Some(value) = payload.into_json().filter(Value::is_object) else {
            return false;
        };

        match serde_json::from_value::<RequestLogRecord>(value) {
            Ok(record) => {
                self.inner.request_logger.write(record);
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "Dropping unreadable request record");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{Formatter, LogEntry, LogRecord, LogSink};
    use crate::messaging::{ConnectionManager, MemoryBroker, MemoryTransport};
    use serde_json::json;
    use std::time::Duration;

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

    async fn aggregator(max_level: Level) -> (LogAggregator, Arc<Capture>) {
        let transport = Arc::new(MemoryTransport::new(MemoryBroker::new(), "memory://aggregator"));
        let connection = ConnectionManager::connect(transport, Duration::from_millis(500))
            .await
            .unwrap();
        let capture = Arc::new(Capture::default());
        let formatter = Formatter::new("logger");
        let aggregator = LogAggregator::new(
            Binder::new(connection),
            QueueNames::default(),
            Logger::new(formatter.clone(), max_level, capture.clone()),
            RequestLogger::new(formatter, capture.clone()),
        );
        (aggregator, capture)
    }

    #[tokio::test]
    async fn test_app_record_bypasses_gate() {
        let (aggregator, capture) = aggregator(Level::Error).await;
        let written = aggregator.handle_app(Payload::Json(json!({
            "level": "debug",
            "message": "cache warmed",
            "meta": {"serviceName": "components", "timestamp": "2024-01-01T00:00:00.000Z"}
        })));

        assert!(written);
        let records = capture.app.lock();
        assert_eq!(records[0].level, Level::Debug);
        assert_eq!(records[0].service_name(), Some("components"));
        assert_eq!(records[0].timestamp(), Some("2024-01-01T00:00:00.000Z"));
    }

    #[tokio::test]
    async fn test_non_objects_dropped() {
        let (aggregator, capture) = aggregator(Level::Debug).await;
        assert!(!aggregator.handle_app(Payload::Text("plain".into())));
        assert!(!aggregator.handle_app(Payload::Json(json!([1, 2]))));
        assert!(!aggregator.handle_app(Payload::Json(json!({"level": "verbose", "message": "x"}))));
        assert!(!aggregator.handle_request(Payload::Json(json!("GET /"))));
        assert!(capture.app.lock().is_empty());
        assert!(capture.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_request_record_forwarded_whole() {
        let (aggregator, capture) = aggregator(Level::Error).await;
        assert!(aggregator.handle_request(Payload::Json(json!({
            "method": "DELETE",
            "url": "/incidents/7",
            "status": 204,
            "serviceName": "incidents",
            "timestamp": "2024-01-01T00:00:00.000Z"
        }))));

        let records = capture.requests.lock();
        assert_eq!(records[0].method, "DELETE");
        assert_eq!(records[0].service_name, "incidents");
    }

    #[tokio::test]
    async fn test_start_binds_both_kinds() {
        let (aggregator, _) = aggregator(Level::Debug).await;
        assert_eq!(aggregator.state(LogKind::App), BindingState::Idle);

        aggregator.start().await.unwrap();
        assert_eq!(aggregator.state(LogKind::App), BindingState::Bound);
        assert_eq!(aggregator.state(LogKind::Request), BindingState::Bound);

        // Already-bound kinds are skipped, so a second start does not fail on
        // the single-consumer queues.
        aggregator.start().await.unwrap();
    }

    #[test]
    fn test_service_queue_names() {
        let names = QueueNames::for_service("logger");
        assert_eq!(names.queue(LogKind::App), "logger-applog");
        assert_eq!(names.queue(LogKind::Request), "logger-reqlog");
        assert_eq!(names.exchange, "logs");
    }
}
