//! Transport trait abstractions

use crate::messaging::config::{ExchangeOptions, QueueOptions};
use crate::messaging::error::MessagingResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Lifecycle events reported by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is usable
    Ready,
    /// The connection dropped or was closed
    End,
    /// Something failed; informational only
    Error(String),
}

/// Sender half a transport reports its lifecycle through
pub type EventSender = UnboundedSender<TransportEvent>;

/// Raw message bodies delivered to a queue consumer
pub type DeliveryStream = BoxStream<'static, Vec<u8>>;

/// A broker connection
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Endpoint this transport connects to
    fn endpoint(&self) -> &str;

    /// Begin connecting in the background. Progress is reported through
    /// `events`; the call itself only fails if the transport cannot start.
    async fn start(&self, events: EventSender) -> MessagingResult<()>;

    /// Re-establish the connection after an unexpected `End`
    async fn reconnect(&self);

    /// Close the connection for good
    async fn close(&self) -> MessagingResult<()>;

    /// Channel for topology and message operations on the live connection
    async fn channel(&self) -> MessagingResult<Arc<dyn Channel>>;
}

/// Topology and message operations on a live connection
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declare an exchange; resolves once the broker reports it open
    async fn declare_exchange(&self, name: &str, options: &ExchangeOptions) -> MessagingResult<()>;

    /// Declare a queue
    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> MessagingResult<()>;

    /// Bind a queue to an exchange
    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str) -> MessagingResult<()>;

    /// Publish raw bytes; returns once the publish is issued
    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> MessagingResult<()>;

    /// Attach a consumer to a queue
    async fn consume(&self, queue: &str) -> MessagingResult<DeliveryStream>;
}

/// A message body as seen by publishers and subscribers.
///
/// Text is transmitted verbatim; anything else is JSON-serialized first.
/// Inbound bodies that parse as JSON are delivered as [`Payload::Json`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(Value),
}

impl Payload {
    /// Serialize any value into a JSON payload
    pub fn json<T: Serialize + ?Sized>(value: &T) -> MessagingResult<Self> {
        Ok(Payload::Json(serde_json::to_value(value)?))
    }

    /// Wire bytes for this payload
    pub fn encode(&self) -> MessagingResult<Vec<u8>> {
        match self {
            Payload::Text(text) => Ok(text.clone().into_bytes()),
            Payload::Json(value) => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Decode wire bytes. Empty bodies decode to `None`.
    pub fn decode(body: &[u8]) -> Option<Self> {
        if body.is_empty() {
            return None;
        }

        let text = String::from_utf8_lossy(body).into_owned();
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Some(Payload::Json(value)),
            Err(_) => Some(Payload::Text(text)),
        }
    }

    /// The JSON object carried by this payload, if it is one
    pub fn as_object(&self) -> Option<&serde_json::Map<String, Value>> {
        match self {
            Payload::Json(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Payload::Text(text),
            other => Payload::Json(other),
        }
    }
}

/// Consumer callback for [`Binder::subscribe`](crate::messaging::Binder::subscribe)
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Payload);
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, payload: Payload) {
        (self)(payload).await
    }
}
