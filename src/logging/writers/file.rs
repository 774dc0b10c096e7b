use crate::logging::error::{LoggingError, LoggingResult};
use crate::logging::level::HTTP_REQUEST_LEVEL;
use crate::logging::record::RequestLogRecord;
use crate::logging::sink::{LogEntry, LogWriter};
use parking_lot::Mutex;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Days of log files kept on disk
pub const RETAINED_FILES: usize = 7;

/// One JSON object per line, rotated daily as `<prefix>.<date>.log`
pub struct FileWriter {
    directory: PathBuf,
    appender: Mutex<RollingFileAppender>,
}

impl FileWriter {
    pub fn new(directory: impl AsRef<Path>, prefix: &str) -> LoggingResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .filename_suffix("log")
            .max_log_files(RETAINED_FILES)
            .build(&directory)
            .map_err(|e| {
                LoggingError::Configuration(format!(
                    "Cannot write log files to {}: {}",
                    directory.display(),
                    e
                ))
            })?;

        Ok(Self {
            directory,
            appender: Mutex::new(appender),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// Request records are written flat, tagged with the `httprequest` level
pub(crate) fn request_document(record: &RequestLogRecord) -> LoggingResult<Value> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(fields) = &mut value {
        fields.insert("level".to_string(), Value::String(HTTP_REQUEST_LEVEL.to_string()));
    }
    Ok(value)
}

impl LogWriter for FileWriter {
    fn name(&self) -> &'static str {
        "file"
    }

    fn write(&self, entry: &LogEntry<'_>) -> LoggingResult<()> {
        let mut line = match entry {
            LogEntry::App(record) => serde_json::to_vec(record)?,
            LogEntry::Request(record) => serde_json::to_vec(&request_document(record)?)?,
        };
        line.push(b'\n');

        let mut appender = self.appender.lock();
        appender.write_all(&line)?;
        appender.flush()?;
        Ok(())
    }
}
