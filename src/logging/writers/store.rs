use crate::logging::error::{LoggingError, LoggingResult};
use crate::logging::sink::{LogEntry, LogWriter};
use crate::logging::writers::file::request_document;
use crate::persistence::CappedCollection;
use serde_json::Value;
use std::path::Path;

/// Collection for application records
pub const APP_COLLECTION: &str = "logs";

/// Collection for HTTP request records
pub const REQUEST_COLLECTION: &str = "requests";

/// Appends records to a capped sled collection
pub struct StoreWriter {
    collection: CappedCollection,
}

impl StoreWriter {
    pub fn open(path: impl AsRef<Path>, collection: &str, capacity: usize) -> LoggingResult<Self> {
        let collection = CappedCollection::open(path, collection, capacity)
            .map_err(|e| LoggingError::Configuration(e.to_string()))?;
        Ok(Self { collection })
    }

    pub fn collection(&self) -> &CappedCollection {
        &self.collection
    }
}

impl LogWriter for StoreWriter {
    fn name(&self) -> &'static str {
        "store"
    }

    fn write(&self, entry: &LogEntry<'_>) -> LoggingResult<()> {
        let value = match entry {
            LogEntry::App(record) => serde_json::to_value(record)?,
            LogEntry::Request(record) => request_document(record)?,
        };
        let Value::Object(doc) = value else {
            return Err(LoggingError::Storage("Log record is not a JSON object".to_string()));
        };

        self.collection
            .append(doc)
            .map_err(|e| LoggingError::Storage(e.to_string()))?;
        Ok(())
    }
}
