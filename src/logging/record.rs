//! Log record types

use crate::logging::level::Level;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::backtrace::{Backtrace, BacktraceStatus};

/// Open key/value metadata carried by an application record
pub type Metadata = serde_json::Map<String, Value>;

pub const SERVICE_NAME_KEY: &str = "serviceName";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const STACK_KEY: &str = "stack";
pub const CODE_KEY: &str = "code";
pub const NAME_KEY: &str = "name";
pub const IS_ERROR_KEY: &str = "isError";

/// Code reported for failures that carry neither a code nor a status
pub const DEFAULT_FAILURE_CODE: u16 = 500;

/// A structured application log record.
///
/// `message` is always plain text; non-text payloads are serialized by the
/// formatter before a record exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    #[serde(default)]
    pub meta: Metadata,
}

impl LogRecord {
    pub fn service_name(&self) -> Option<&str> {
        self.meta.get(SERVICE_NAME_KEY).and_then(Value::as_str)
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.meta.get(TIMESTAMP_KEY).and_then(Value::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.meta.get(IS_ERROR_KEY).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn stack(&self) -> Option<&str> {
        self.meta.get(STACK_KEY).and_then(Value::as_str)
    }
}

/// One HTTP request, as logged by the request middleware. Flat, no nested meta.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogRecord {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub status: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub content_length: Option<u64>,
    /// Milliseconds from request start to response headers
    #[serde(default, deserialize_with = "lenient_f64")]
    pub response_time: Option<f64>,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub timestamp: String,
}

// Request fields may arrive as header strings ("512") from other producers.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// An error being logged
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub name: String,
    pub message: String,
    pub code: Option<Value>,
    pub status: Option<u16>,
    causes: Vec<String>,
    trace: String,
}

impl Failure {
    /// A failure named `Error`. Frames are captured only when
    /// `RUST_BACKTRACE`/`RUST_LIB_BACKTRACE` enable them.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            code: None,
            status: None,
            causes: Vec::new(),
            trace: captured_frames(),
        }
    }

    /// Capture `err` together with its source chain
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let mut failure = Self::new(err.to_string());
        let mut source = err.source();
        while let Some(cause) = source {
            failure.causes.push(cause.to_string());
            source = cause.source();
        }
        failure
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<Value>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Explicit code, else status, else 500
    pub fn effective_code(&self) -> Value {
        self.code
            .clone()
            .or_else(|| self.status.map(Value::from))
            .unwrap_or_else(|| Value::from(DEFAULT_FAILURE_CODE))
    }

    /// `Name: message`, the cause chain, then the captured frames
    pub fn stack(&self) -> String {
        let mut stack = format!("{}: {}", self.name, self.message);
        for cause in &self.causes {
            stack.push_str("\nCaused by: ");
            stack.push_str(cause);
        }
        if !self.trace.is_empty() {
            stack.push('\n');
            stack.push_str(&self.trace);
        }
        stack
    }
}

fn captured_frames() -> String {
    let trace = Backtrace::capture();
    match trace.status() {
        BacktraceStatus::Captured => trace.to_string(),
        _ => String::new(),
    }
}

/// What a log call was given, decided once at the call site
#[derive(Debug, Clone, PartialEq)]
pub enum LogPayload {
    Text(String),
    Structured(Value),
    Failure(Failure),
}

impl From<&str> for LogPayload {
    fn from(text: &str) -> Self {
        LogPayload::Text(text.to_string())
    }
}

impl From<String> for LogPayload {
    fn from(text: String) -> Self {
        LogPayload::Text(text)
    }
}

impl From<Value> for LogPayload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => LogPayload::Text(text),
            other => LogPayload::Structured(other),
        }
    }
}

impl From<Failure> for LogPayload {
    fn from(failure: Failure) -> Self {
        LogPayload::Failure(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "query failed")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_failure_code_precedence() {
        assert_eq!(Failure::new("x").effective_code(), json!(500));
        assert_eq!(Failure::new("x").with_status(404).effective_code(), json!(404));
        assert_eq!(
            Failure::new("x").with_status(404).with_code("ECONNREFUSED").effective_code(),
            json!("ECONNREFUSED")
        );
    }

    #[test]
    fn test_failure_stack_includes_causes() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "socket closed"));
        let failure = Failure::from_error(&err);
        let stack = failure.stack();
        assert!(stack.starts_with("Error: query failed"));
        assert!(stack.contains("Caused by: socket closed"));
    }

    #[test]
    fn test_failure_stack_never_empty() {
        let failure = Failure::new("boom");
        let stack = failure.stack();
        assert!(stack.starts_with("Error: boom"));
        assert!(!stack.contains("disabled backtrace"));
        assert!(!stack.contains("unsupported backtrace"));
    }

    #[test]
    fn test_request_record_accepts_string_numbers() {
        let record: RequestLogRecord = serde_json::from_value(json!({
            "method": "GET",
            "url": "/api/components",
            "ip": "10.0.0.1",
            "status": 200,
            "contentLength": "512",
            "responseTime": "3.250",
            "serviceName": "components",
            "timestamp": "2024-01-01T00:00:00.000Z"
        }))
        .unwrap();

        assert_eq!(record.status, Some(200));
        assert_eq!(record.content_length, Some(512));
        assert_eq!(record.response_time, Some(3.25));
    }

    #[test]
    fn test_payload_from_json_string_is_text() {
        assert_eq!(LogPayload::from(json!("hi")), LogPayload::Text("hi".into()));
        assert!(matches!(LogPayload::from(json!({"a": 1})), LogPayload::Structured(_)));
    }
}
