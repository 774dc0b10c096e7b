//! Turns log call arguments into records

use crate::logging::level::Level;
use crate::logging::record::{
    LogPayload, LogRecord, Metadata, RequestLogRecord, CODE_KEY, IS_ERROR_KEY, NAME_KEY,
    SERVICE_NAME_KEY, STACK_KEY, TIMESTAMP_KEY,
};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Current time as `YYYY-MM-DDTHH:MM:SS.mmmZ`
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds records stamped with the identity of the emitting service
#[derive(Debug, Clone)]
pub struct Formatter {
    service_name: Arc<str>,
}

impl Formatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: Arc::from(service_name.into()),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Build an application record.
    ///
    /// Failures contribute `stack`, `code`, `name` and `isError` to the
    /// metadata; structured payloads become their JSON text. `serviceName`
    /// and `timestamp` are filled in only when the caller did not supply them.
    pub fn format(&self, level: Level, payload: impl Into<LogPayload>, meta: Metadata) -> LogRecord {
        let mut meta = meta;

        let message = match payload.into() {
            LogPayload::Text(text) => text,
            LogPayload::Structured(value) => value.to_string(),
            LogPayload::Failure(failure) => {
                meta.insert(STACK_KEY.to_string(), Value::String(failure.stack()));
                meta.insert(CODE_KEY.to_string(), failure.effective_code());
                meta.insert(NAME_KEY.to_string(), Value::String(failure.name.clone()));
                meta.insert(IS_ERROR_KEY.to_string(), Value::Bool(true));
                failure.message
            }
        };

        meta.entry(SERVICE_NAME_KEY)
            .or_insert_with(|| Value::String(self.service_name.to_string()));
        meta.entry(TIMESTAMP_KEY)
            .or_insert_with(|| Value::String(timestamp_now()));

        LogRecord {
            level,
            message,
            meta,
        }
    }

    /// Fill in `serviceName` and `timestamp` on a request record when blank
    pub fn format_request(&self, mut record: RequestLogRecord) -> RequestLogRecord {
        if record.service_name.is_empty() {
            record.service_name = self.service_name.to_string();
        }
        if record.timestamp.is_empty() {
            record.timestamp = timestamp_now();
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::record::Failure;
    use serde_json::json;

    #[test]
    fn test_text_is_verbatim() {
        let record = Formatter::new("incidents").format(Level::Info, "started", Metadata::new());
        assert_eq!(record.message, "started");
        assert_eq!(record.service_name(), Some("incidents"));
        assert!(!record.is_error());
    }

    #[test]
    fn test_caller_metadata_wins() {
        let mut meta = Metadata::new();
        meta.insert(TIMESTAMP_KEY.into(), json!("2020-02-02T02:02:02.020Z"));
        meta.insert(SERVICE_NAME_KEY.into(), json!("gateway"));

        let record = Formatter::new("logger").format(Level::Warn, "slow", meta);
        assert_eq!(record.timestamp(), Some("2020-02-02T02:02:02.020Z"));
        assert_eq!(record.service_name(), Some("gateway"));
    }

    #[test]
    fn test_failure_with_status() {
        let failure = Failure::new("not found").with_status(404).with_name("NotFoundError");
        let record = Formatter::new("components").format(Level::Error, failure, Metadata::new());

        assert_eq!(record.message, "not found");
        assert_eq!(record.meta[CODE_KEY], json!(404));
        assert_eq!(record.meta[NAME_KEY], json!("NotFoundError"));
        assert!(record.stack().unwrap().starts_with("NotFoundError: not found"));
    }

    #[test]
    fn test_request_fill_only_blanks() {
        let formatter = Formatter::new("gateway");
        let record = formatter.format_request(RequestLogRecord {
            method: "GET".into(),
            timestamp: "2021-01-01T00:00:00.000Z".into(),
            ..Default::default()
        });
        assert_eq!(record.service_name, "gateway");
        assert_eq!(record.timestamp, "2021-01-01T00:00:00.000Z");
    }
}
