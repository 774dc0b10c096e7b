//! In-process broker.
//!
//! Implements the exchange/queue/binding topology inside the current process:
//! a published message is copied to every queue bound to its exchange with a
//! matching routing key (or `#`), and each queue delivers to its single
//! consumer in publish order. A broker built with
//! [`MemoryBroker::with_journal`] also records every topology and publish call
//! so callers can inspect exactly what reached it.
//!
//! [`MemoryTransport`] connects to a shared [`MemoryBroker`] and can be told to
//! delay readiness, never become ready, or drop its connection.

use crate::messaging::config::{ExchangeOptions, ExchangeType, QueueOptions, WILDCARD_BINDING_KEY};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::transport::{
    Channel, DeliveryStream, EventSender, Transport, TransportEvent,
};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// One operation that reached the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerOp {
    DeclareExchange {
        name: String,
        options: ExchangeOptions,
    },
    DeclareQueue {
        name: String,
        options: QueueOptions,
    },
    Bind {
        queue: String,
        exchange: String,
        binding_key: String,
    },
    Publish {
        exchange: String,
        routing_key: String,
        body: Vec<u8>,
    },
}

struct MemoryQueue {
    options: QueueOptions,
    bindings: Vec<(String, String)>,
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryQueue {
    fn new(options: QueueOptions) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            options,
            bindings: Vec::new(),
            sender,
            receiver: Some(receiver),
        }
    }

    fn matches(&self, exchange: &str, kind: ExchangeType, routing_key: &str) -> bool {
        self.bindings.iter().any(|(bound_exchange, key)| {
            bound_exchange == exchange
                && (kind == ExchangeType::Fanout
                    || key == WILDCARD_BINDING_KEY
                    || key == routing_key)
        })
    }
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeOptions>,
    queues: HashMap<String, MemoryQueue>,
    journal: Option<Vec<BrokerOp>>,
}

impl BrokerState {
    fn record(&mut self, op: impl FnOnce() -> BrokerOp) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(op());
        }
    }
}

/// Broker shared by every [`MemoryTransport`] connected to it
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A broker that keeps every operation it receives, bodies included.
    /// The journal is never trimmed.
    pub fn with_journal() -> Arc<Self> {
        let broker = Self::default();
        broker.state.lock().journal = Some(Vec::new());
        Arc::new(broker)
    }

    pub fn is_journaling(&self) -> bool {
        self.state.lock().journal.is_some()
    }

    /// Every operation received so far, oldest first. Empty unless the
    /// broker was built with [`MemoryBroker::with_journal`].
    pub fn journal(&self) -> Vec<BrokerOp> {
        self.state.lock().journal.clone().unwrap_or_default()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.state.lock().exchanges.contains_key(name)
    }

    /// Bindings of `queue` as `(exchange, binding_key)` pairs
    pub fn bindings(&self, queue: &str) -> Vec<(String, String)> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.bindings.clone())
            .unwrap_or_default()
    }

    fn declare_exchange(&self, name: &str, options: &ExchangeOptions) -> MessagingResult<()> {
        let mut state = self.state.lock();
        state.record(|| BrokerOp::DeclareExchange {
            name: name.to_string(),
            options: *options,
        });

        match state.exchanges.get(name) {
            Some(existing) if existing != options => Err(MessagingError::DeclareFailed(format!(
                "exchange '{}' already declared with different options",
                name
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), *options);
                Ok(())
            }
        }
    }

    fn declare_queue(&self, name: &str, options: &QueueOptions) -> MessagingResult<()> {
        let mut state = self.state.lock();
        state.record(|| BrokerOp::DeclareQueue {
            name: name.to_string(),
            options: *options,
        });

        match state.queues.get(name) {
            Some(existing) if existing.options != *options => Err(MessagingError::DeclareFailed(
                format!("queue '{}' already declared with different options", name),
            )),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(name.to_string(), MemoryQueue::new(*options));
                Ok(())
            }
        }
    }

    fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str) -> MessagingResult<()> {
        let mut state = self.state.lock();
        state.record(|| BrokerOp::Bind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            binding_key: binding_key.to_string(),
        });

        if !state.exchanges.contains_key(exchange) {
            return Err(MessagingError::BindFailed(format!(
                "no exchange '{}'",
                exchange
            )));
        }

        let entry = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| MessagingError::BindFailed(format!("no queue '{}'", queue)))?;

        let binding = (exchange.to_string(), binding_key.to_string());
        if !entry.bindings.contains(&binding) {
            entry.bindings.push(binding);
        }
        Ok(())
    }

    fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> MessagingResult<usize> {
        let mut state = self.state.lock();
        state.record(|| BrokerOp::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.clone(),
        });

        let kind = state
            .exchanges
            .get(exchange)
            .map(|options| options.kind)
            .ok_or_else(|| MessagingError::PublishFailed(format!("no exchange '{}'", exchange)))?;

        let mut routed = 0;
        for queue in state.queues.values() {
            if queue.matches(exchange, kind, routing_key) && queue.sender.send(body.clone()).is_ok() {
                routed += 1;
            }
        }
        Ok(routed)
    }

    fn consume(&self, queue: &str) -> MessagingResult<DeliveryStream> {
        let mut state = self.state.lock();
        let entry = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| MessagingError::SubscribeFailed(format!("no queue '{}'", queue)))?;

        let receiver = entry.receiver.take().ok_or_else(|| {
            MessagingError::SubscribeFailed(format!("queue '{}' already has a consumer", queue))
        })?;

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

/// How a [`MemoryTransport`] behaves when asked to connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Ready right away
    Immediate,
    /// Ready after the given delay
    After(Duration),
    /// Never ready
    Never,
}

struct Link {
    broker: Arc<MemoryBroker>,
    connected: AtomicBool,
    closed: AtomicBool,
    events: Mutex<Option<EventSender>>,
}

impl Link {
    fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    fn ensure_connected(&self) -> MessagingResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MessagingError::NotConnected("in-memory broker link is down".to_string()))
        }
    }
}

/// Transport connected to a [`MemoryBroker`]
pub struct MemoryTransport {
    endpoint: String,
    readiness: Readiness,
    link: Arc<Link>,
    reconnect_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MemoryTransport {
    pub fn new(broker: Arc<MemoryBroker>, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            readiness: Readiness::Immediate,
            link: Arc::new(Link {
                broker,
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                events: Mutex::new(None),
            }),
            reconnect_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    /// Drop the connection as if the broker went away
    pub fn simulate_drop(&self) {
        self.link.connected.store(false, Ordering::SeqCst);
        self.link.emit(TransportEvent::End);
    }

    /// Report an error without touching the connection
    pub fn simulate_error(&self, error: impl Into<String>) {
        self.link.emit(TransportEvent::Error(error.into()));
    }

    /// Emit `ready` regardless of the configured readiness
    pub fn force_ready(&self) {
        self.link.connected.store(true, Ordering::SeqCst);
        self.link.emit(TransportEvent::Ready);
    }

    pub fn reconnect_calls(&self) -> usize {
        self.reconnect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn schedule_ready(&self) {
        let link = self.link.clone();
        let delay = match self.readiness {
            Readiness::Immediate => Duration::ZERO,
            Readiness::After(delay) => delay,
            Readiness::Never => return,
        };

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if link.closed.load(Ordering::SeqCst) {
                return;
            }
            link.connected.store(true, Ordering::SeqCst);
            link.emit(TransportEvent::Ready);
        });
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn start(&self, events: EventSender) -> MessagingResult<()> {
        *self.link.events.lock() = Some(events);
        self.schedule_ready();
        Ok(())
    }

    async fn reconnect(&self) {
        self.reconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.schedule_ready();
    }

    async fn close(&self) -> MessagingResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.link.closed.store(true, Ordering::SeqCst);
        self.link.connected.store(false, Ordering::SeqCst);
        self.link.emit(TransportEvent::End);
        Ok(())
    }

    async fn channel(&self) -> MessagingResult<Arc<dyn Channel>> {
        self.link.ensure_connected()?;
        Ok(Arc::new(MemoryChannel {
            link: self.link.clone(),
        }))
    }
}

struct MemoryChannel {
    link: Arc<Link>,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_exchange(&self, name: &str, options: &ExchangeOptions) -> MessagingResult<()> {
        self.link.ensure_connected()?;
        self.link.broker.declare_exchange(name, options)
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> MessagingResult<()> {
        self.link.ensure_connected()?;
        self.link.broker.declare_queue(name, options)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str) -> MessagingResult<()> {
        self.link.ensure_connected()?;
        self.link.broker.bind_queue(queue, exchange, binding_key)
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> MessagingResult<()> {
        self.link.ensure_connected()?;
        let routed = self.link.broker.publish(exchange, routing_key, body)?;
        tracing::trace!(exchange, routing_key, routed, "Published to in-memory broker");
        Ok(())
    }

    async fn consume(&self, queue: &str) -> MessagingResult<DeliveryStream> {
        self.link.ensure_connected()?;
        self.link.broker.consume(queue)
    }
}
