//! Application and HTTP request logging.
//!
//! Producer services build a [`Logger`] and a [`RequestLogger`] over a
//! [`BrokerSink`], so records leave the process on the `logs` exchange with
//! routing key `app` or `request`. The logger service builds the same loggers
//! over their own [`FanOut`]s of local writers and feeds them from its
//! queues. Each fan-out gets [`WriterDefaults`] for its record kind, so
//! application and request records never share a file or store collection.
//!
//! # Example
//!
//! ```no_run
//! use status_page::logging::{build_fan_out, Formatter, Level, Logger, WriterConfig, WriterDefaults};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let writers = build_fan_out(&[WriterConfig::console()], &WriterDefaults::app(Level::Debug))?;
//! let logger = Logger::new(Formatter::new("components"), Level::Info, Arc::new(writers));
//!
//! logger.info("component service started");
//! logger.debug("suppressed at info");
//! # Ok(())
//! # }
//! ```

mod error;
mod formatter;
mod level;
mod logger;
mod record;
mod sink;

pub mod middleware;
pub mod writers;

pub use error::{LoggingError, LoggingResult};
pub use formatter::{timestamp_now, Formatter};
pub use level::{Level, HTTP_REQUEST_LEVEL};
pub use logger::{Logger, RequestLogger};
pub use middleware::RequestLogLayer;
pub use record::{
    Failure, LogPayload, LogRecord, Metadata, RequestLogRecord, CODE_KEY, DEFAULT_FAILURE_CODE,
    IS_ERROR_KEY, NAME_KEY, SERVICE_NAME_KEY, STACK_KEY, TIMESTAMP_KEY,
};
pub use sink::{BrokerSink, FanOut, LogEntry, LogSink, LogWriter, APP_ROUTING_KEY, REQUEST_ROUTING_KEY};
pub use writers::{
    build_fan_out, open_writers, ConsoleWriter, FileWriter, StoreWriter, WriterConfig,
    WriterDefaults, WriterTarget, Writers, APP_COLLECTION, APP_FILE_PREFIX, REQUEST_COLLECTION,
    REQUEST_FILE_PREFIX,
};
