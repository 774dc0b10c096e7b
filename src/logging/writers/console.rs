use crate::logging::error::LoggingResult;
use crate::logging::level::{Level, HTTP_REQUEST_LEVEL};
use crate::logging::record::{LogRecord, RequestLogRecord, SERVICE_NAME_KEY, TIMESTAMP_KEY};
use crate::logging::sink::{LogEntry, LogWriter};
use parking_lot::Mutex;
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Human-readable, colorized lines on stdout
pub struct ConsoleWriter {
    out: Mutex<Box<dyn WriteColor + Send>>,
}

impl ConsoleWriter {
    pub fn stdout() -> Self {
        Self::with_output(StandardStream::stdout(ColorChoice::Auto))
    }

    pub fn with_output(out: impl WriteColor + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    fn write_tag(out: &mut dyn WriteColor, label: &str, color: Color, service: &str) -> std::io::Result<()> {
        out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
        write!(out, "[{}:{}]", label, service)?;
        out.reset()
    }
}

fn level_color(level: Level) -> Color {
    match level {
        Level::Error => Color::Red,
        Level::Warn => Color::Yellow,
        Level::Info => Color::Green,
        Level::Debug => Color::Blue,
    }
}

/// Trailing part of an application line: the stack for errors, otherwise any
/// metadata beyond the service name and timestamp as compact JSON.
fn app_tail(record: &LogRecord) -> String {
    if record.is_error() {
        if let Some(stack) = record.stack() {
            return format!(" \n{}", stack);
        }
    }

    let extra: serde_json::Map<_, _> = record
        .meta
        .iter()
        .filter(|(key, _)| key.as_str() != SERVICE_NAME_KEY && key.as_str() != TIMESTAMP_KEY)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if extra.is_empty() {
        String::new()
    } else {
        format!(" {}", serde_json::Value::Object(extra))
    }
}

fn display_or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn request_body(record: &RequestLogRecord) -> String {
    let response_time = record
        .response_time
        .map(|ms| format!("{:.3}", ms))
        .unwrap_or_else(|| "-".to_string());
    let ip = if record.ip.is_empty() { "-" } else { record.ip.as_str() };

    format!(
        "{} {} {} {} - {} ms {}",
        record.method,
        record.url,
        display_or_dash(record.status),
        display_or_dash(record.content_length),
        response_time,
        ip
    )
}

impl LogWriter for ConsoleWriter {
    fn name(&self) -> &'static str {
        "console"
    }

    fn write(&self, entry: &LogEntry<'_>) -> LoggingResult<()> {
        let mut out = self.out.lock();

        match entry {
            LogEntry::App(record) => {
                Self::write_tag(
                    out.as_mut(),
                    record.level.label(),
                    level_color(record.level),
                    record.service_name().unwrap_or("-"),
                )?;
                writeln!(
                    out,
                    " - {} {}{}",
                    record.timestamp().unwrap_or("-"),
                    record.message,
                    app_tail(record)
                )?;
            }
            LogEntry::Request(record) => {
                Self::write_tag(
                    out.as_mut(),
                    &HTTP_REQUEST_LEVEL.to_uppercase(),
                    Color::Cyan,
                    &record.service_name,
                )?;
                writeln!(out, " - {} {}", record.timestamp, request_body(record))?;
            }
        }

        out.flush()?;
        Ok(())
    }
}
