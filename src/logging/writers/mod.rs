//! Output destinations for the log pipeline and the config that selects them.

pub mod console;
pub mod file;
pub mod store;

pub use console::ConsoleWriter;
pub use file::{FileWriter, RETAINED_FILES};
pub use store::{StoreWriter, APP_COLLECTION, REQUEST_COLLECTION};

use crate::logging::error::{LoggingError, LoggingResult};
use crate::logging::level::Level;
use crate::logging::sink::{FanOut, LogWriter};
use crate::persistence::{CappedCollection, DEFAULT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File prefix for application records
pub const APP_FILE_PREFIX: &str = "app";

/// File prefix for HTTP request records
pub const REQUEST_FILE_PREFIX: &str = "request";

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

/// Where a writer sends its records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriterTarget {
    Console,
    File {
        #[serde(default)]
        directory: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    Store {
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default = "default_capacity")]
        capacity: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collection: Option<String>,
    },
}

/// What a writer falls back to for settings its config leaves out.
///
/// Application and request writers get different file prefixes and store
/// collections, so each file and collection holds a single record shape.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterDefaults {
    pub level: Level,
    pub file_prefix: String,
    pub collection: String,
}

impl WriterDefaults {
    pub fn app(level: Level) -> Self {
        Self {
            level,
            file_prefix: APP_FILE_PREFIX.to_string(),
            collection: APP_COLLECTION.to_string(),
        }
    }

    /// Request records pass every writer level, so `level` only matters for
    /// writers that also receive application records
    pub fn request(level: Level) -> Self {
        Self {
            level,
            file_prefix: REQUEST_FILE_PREFIX.to_string(),
            collection: REQUEST_COLLECTION.to_string(),
        }
    }
}

/// One configured writer. Without a `level` the writer takes the logger's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(flatten)]
    pub target: WriterTarget,
}

impl WriterConfig {
    pub fn console() -> Self {
        Self {
            level: None,
            target: WriterTarget::Console,
        }
    }

    pub fn file(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            level: None,
            target: WriterTarget::File {
                directory: Some(directory.into()),
                prefix: Some(prefix.into()),
            },
        }
    }

    pub fn store(path: impl Into<PathBuf>) -> Self {
        Self {
            level: None,
            target: WriterTarget::Store {
                path: Some(path.into()),
                capacity: DEFAULT_CAPACITY,
                collection: None,
            },
        }
    }

    /// Override the store collection; no effect on other targets
    pub fn with_collection(mut self, name: impl Into<String>) -> Self {
        if let WriterTarget::Store { collection, .. } = &mut self.target {
            *collection = Some(name.into());
        }
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Database directory of a store writer
    pub fn store_path(&self) -> Option<&Path> {
        match &self.target {
            WriterTarget::Store { path, .. } => path.as_deref(),
            _ => None,
        }
    }

    /// Open the writer. Missing locations are reported here rather than
    /// surfacing later as dropped records.
    pub fn build(&self, defaults: &WriterDefaults) -> LoggingResult<Box<dyn LogWriter>> {
        match &self.target {
            WriterTarget::Console => Ok(Box::new(ConsoleWriter::stdout())),
            WriterTarget::File { directory, prefix } => {
                let directory = directory.as_ref().ok_or_else(|| {
                    LoggingError::Configuration("File writer requires a directory".to_string())
                })?;
                let prefix = prefix.as_deref().unwrap_or(&defaults.file_prefix);
                Ok(Box::new(FileWriter::new(directory, prefix)?))
            }
            WriterTarget::Store { .. } => Ok(Box::new(self.open_store(defaults)?)),
        }
    }

    fn open_store(&self, defaults: &WriterDefaults) -> LoggingResult<StoreWriter> {
        match &self.target {
            WriterTarget::Store {
                path,
                capacity,
                collection,
            } => {
                let path = path.as_ref().ok_or_else(|| {
                    LoggingError::Configuration("Store writer requires a path".to_string())
                })?;
                let collection = collection.as_deref().unwrap_or(&defaults.collection);
                StoreWriter::open(path, collection, *capacity)
            }
            _ => Err(LoggingError::Configuration("Not a store writer".to_string())),
        }
    }
}

/// Writers opened from config, plus the collections behind any store writers
pub struct Writers {
    pub fan_out: FanOut,
    pub stores: Vec<CappedCollection>,
}

/// Open every configured writer, failing on the first misconfigured one
pub fn open_writers(configs: &[WriterConfig], defaults: &WriterDefaults) -> LoggingResult<Writers> {
    let mut fan_out = FanOut::new();
    let mut stores = Vec::new();

    for config in configs {
        let writer: Box<dyn LogWriter> = match &config.target {
            WriterTarget::Store { .. } => {
                let writer = config.open_store(defaults)?;
                stores.push(writer.collection().clone());
                Box::new(writer)
            }
            _ => config.build(defaults)?,
        };
        let level = config.level.unwrap_or(defaults.level);
        tracing::debug!(writer = writer.name(), level = %level, "Configured log writer");
        fan_out = fan_out.with_writer(level, writer);
    }

    Ok(Writers { fan_out, stores })
}

/// [`open_writers`] when the store handles are not needed
pub fn build_fan_out(configs: &[WriterConfig], defaults: &WriterDefaults) -> LoggingResult<FanOut> {
    open_writers(configs, defaults).map(|writers| writers.fan_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::formatter::Formatter;
    use crate::logging::record::{Metadata, RequestLogRecord};
    use crate::logging::sink::{LogEntry, LogSink};
    use crate::persistence::{Query, Repository};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_config_shapes() {
        let configs: Vec<WriterConfig> = serde_json::from_value(json!([
            {"kind": "console"},
            {"kind": "file", "directory": "/var/log/status", "prefix": "app", "level": "warn"},
            {"kind": "store", "path": "/var/lib/status/logs", "collection": "archive"}
        ]))
        .unwrap();

        assert_eq!(configs[0], WriterConfig::console());
        assert_eq!(
            configs[1],
            WriterConfig::file("/var/log/status", "app").with_level(Level::Warn)
        );
        assert_eq!(
            configs[2],
            WriterConfig::store("/var/lib/status/logs").with_collection("archive")
        );
    }

    #[test]
    fn test_file_without_directory_fails_at_build() {
        let config: WriterConfig = serde_json::from_value(json!({"kind": "file"})).unwrap();
        let err = build_fan_out(&[WriterConfig::console(), config], &WriterDefaults::app(Level::Info))
            .unwrap_err();
        assert!(matches!(err, LoggingError::Configuration(_)));
    }

    #[test]
    fn test_store_without_path_fails_at_build() {
        let config: WriterConfig = serde_json::from_value(json!({"kind": "store"})).unwrap();
        assert!(matches!(
            config.build(&WriterDefaults::app(Level::Info)),
            Err(LoggingError::Configuration(_))
        ));
    }

    #[test]
    fn test_builds_all_writers() {
        let dir = TempDir::new().unwrap();
        let fan_out = build_fan_out(
            &[
                WriterConfig::console(),
                WriterConfig::file(dir.path().join("files"), "logger"),
                WriterConfig::store(dir.path().join("db")),
            ],
            &WriterDefaults::app(Level::Debug),
        )
        .unwrap();
        assert_eq!(fan_out.len(), 3);

        let writers = open_writers(
            &[WriterConfig::store(dir.path().join("other"))],
            &WriterDefaults::app(Level::Info),
        )
        .unwrap();
        assert_eq!(writers.stores.len(), 1);
        assert!(writers.stores[0].is_empty());
    }

    #[tokio::test]
    async fn test_store_collection_follows_record_kind() {
        let dir = TempDir::new().unwrap();
        let formatter = Formatter::new("gateway");

        let app = open_writers(
            &[WriterConfig::store(dir.path().join("app"))],
            &WriterDefaults::app(Level::Debug),
        )
        .unwrap();
        let requests = open_writers(
            &[WriterConfig::store(dir.path().join("requests"))],
            &WriterDefaults::request(Level::Debug),
        )
        .unwrap();

        let record = formatter.format(Level::Info, "started", Metadata::new());
        app.fan_out.write(&LogEntry::App(&record));
        let request = formatter.format_request(RequestLogRecord {
            method: "GET".into(),
            url: "/".into(),
            ..Default::default()
        });
        requests.fan_out.write(&LogEntry::Request(&request));

        assert_eq!(app.stores[0].name(), APP_COLLECTION);
        assert_eq!(requests.stores[0].name(), REQUEST_COLLECTION);

        let app_docs = app.stores[0].find(&Query::all(), None).await.unwrap();
        assert_eq!(app_docs.len(), 1);
        assert_eq!(app_docs[0]["message"], "started");
        let request_docs = requests.stores[0].find(&Query::all(), None).await.unwrap();
        assert_eq!(request_docs.len(), 1);
        assert_eq!(request_docs[0]["level"], "httprequest");
    }
}
