pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::config::Config;
use crate::logging::RequestLogger;
use crate::messaging::ConnectionManager;
use crate::persistence::Repository;
use serde::Serialize;
use std::sync::Arc;

/// Identity reported by the health check
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub environment: String,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: environment.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.service.name.clone(), config.service.environment.clone())
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: ServiceInfo,
    pub connection: Option<Arc<ConnectionManager>>,
    pub store: Option<Arc<dyn Repository>>,
    pub request_logger: Option<RequestLogger>,
    pub prometheus_enabled: bool,
}

impl AppState {
    pub fn new(service: ServiceInfo) -> Self {
        Self {
            service,
            connection: None,
            store: None,
            request_logger: None,
            prometheus_enabled: false,
        }
    }

    /// Report broker readiness through the health check
    pub fn with_connection(mut self, connection: Arc<ConnectionManager>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Report database availability through the health check
    pub fn with_store(mut self, store: Arc<dyn Repository>) -> Self {
        self.store = Some(store);
        self
    }

    /// Log every request handled by the router
    pub fn with_request_logger(mut self, logger: RequestLogger) -> Self {
        self.request_logger = Some(logger);
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.prometheus_enabled = enabled;
        self
    }
}
