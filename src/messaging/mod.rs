//! Resilient message-queue client
//!
//! Every service in the platform shares one broker connection per process and
//! uses it to publish log records to, and consume them from, the `logs`
//! exchange.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  Binder                          │
//! ├─────────────────────────────────────────────────┤
//! │  - create_exchange()  - subscribe()  - publish() │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │            ConnectionManager                     │
//! ├─────────────────────────────────────────────────┤
//! │  connecting -> ready -> ended -> connecting      │
//! │  readiness deadline, reconnect on drop           │
//! └─────────────────────────────────────────────────┘
//!           │                        │
//!           ▼                        ▼
//! ┌──────────────────┐    ┌──────────────────┐
//! │  AMQP (lapin)    │    │  In-memory       │
//! ├──────────────────┤    ├──────────────────┤
//! │ - backoff        │    │ - single process │
//! │ - topology       │    │ - fault injection│
//! │   restore        │    │ - journal        │
//! └──────────────────┘    └──────────────────┘
//! ```
//!
//! Delivery is at-most-once: messages published while the connection is down
//! are lost, and consumers do not acknowledge.
//!
//! # Example
//!
//! ```no_run
//! use status_page::messaging::{connect, BrokerConfig, Binder, PublishOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BrokerConfig::default();
//!     let connection = connect(&config).await?;
//!     let binder = Binder::new(connection);
//!
//!     binder
//!         .publish(
//!             serde_json::json!({"level": "info", "message": "hello"}),
//!             "logs",
//!             &PublishOptions::with_routing_key("app"),
//!         )
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

mod amqp;
mod binder;
mod config;
mod connection;
mod error;
mod memory;
mod metrics;
mod state;
mod transport;

pub use amqp::AmqpTransport;
pub use binder::Binder;
pub use config::{
    BrokerBackend, BrokerConfig, ExchangeOptions, ExchangeType, PublishOptions, QueueOptions,
    ReconnectPolicy, SubscribeOptions, LOG_EXCHANGE, WILDCARD_BINDING_KEY,
};
pub use connection::{redact_endpoint, ConnectionManager};
pub use error::{MessagingError, MessagingResult};
pub use memory::{BrokerOp, MemoryBroker, MemoryTransport, Readiness};
pub use metrics::{init_messaging_metrics, MESSAGING_METRICS};
pub use state::{ConnectionState, ReadyOutcome, StateData, StateTransition};
pub use transport::{
    Channel, DeliveryStream, EventSender, MessageHandler, Payload, Transport, TransportEvent,
};

use std::sync::Arc;

/// Build the transport selected by `config` and connect it under the
/// configured readiness deadline
pub async fn connect(config: &BrokerConfig) -> MessagingResult<Arc<ConnectionManager>> {
    if config.url.trim().is_empty() {
        return Err(MessagingError::ConfigurationError("broker url is empty".to_string()));
    }
    if config.connect_timeout_ms == 0 {
        return Err(MessagingError::ConfigurationError(
            "connect timeout must be greater than zero".to_string(),
        ));
    }

    let transport: Arc<dyn Transport> = match config.backend {
        BrokerBackend::Amqp => Arc::new(AmqpTransport::new(
            config.url.clone(),
            config.reconnect.clone(),
        )),
        BrokerBackend::InMemory => Arc::new(MemoryTransport::new(MemoryBroker::new(), config.url.clone())),
    };

    ConnectionManager::connect(transport, config.connect_timeout()).await
}
