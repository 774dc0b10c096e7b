//! Status page platform core.
//!
//! A resilient message-queue client shared by every service, plus the log
//! pipeline it carries: producers publish application and HTTP request
//! records to the `logs` exchange and the logger service aggregates them into
//! console, file and database writers.

pub mod aggregator;
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod persistence;

pub use error::{AppError, Result};
