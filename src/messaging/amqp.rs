//! AMQP 0-9-1 transport backed by `lapin`.
//!
//! Connection attempts are retried with the configured exponential backoff
//! until one succeeds or the transport is closed. Only one attempt is ever in
//! flight. Declared exchanges, queues, bindings and consumers are remembered
//! and re-applied on every new connection, so consumers keep receiving across
//! a broker restart. Messages published while disconnected are lost.

use crate::messaging::config::{ExchangeOptions, ExchangeType, QueueOptions, ReconnectPolicy};
use crate::messaging::connection::redact_endpoint;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::transport::{
    Channel, DeliveryStream, EventSender, Transport, TransportEvent,
};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties, ExchangeKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

#[derive(Default, Clone)]
struct Topology {
    exchanges: Vec<(String, ExchangeOptions)>,
    queues: Vec<(String, QueueOptions)>,
    bindings: Vec<(String, String, String)>,
    consumers: Vec<(String, mpsc::UnboundedSender<Vec<u8>>)>,
}

impl Topology {
    fn remember_exchange(&mut self, name: &str, options: &ExchangeOptions) {
        if !self.exchanges.iter().any(|(n, _)| n == name) {
            self.exchanges.push((name.to_string(), *options));
        }
    }

    fn remember_queue(&mut self, name: &str, options: &QueueOptions) {
        if !self.queues.iter().any(|(n, _)| n == name) {
            self.queues.push((name.to_string(), *options));
        }
    }

    fn remember_binding(&mut self, queue: &str, exchange: &str, key: &str) {
        let binding = (queue.to_string(), exchange.to_string(), key.to_string());
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
    }
}

/// Numbers each opened connection so callbacks from an abandoned one cannot
/// touch the live connection's state
#[derive(Default)]
struct Generations {
    next: AtomicU64,
    live: AtomicU64,
}

impl Generations {
    fn begin(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn promote(&self, generation: u64) {
        self.live.store(generation, Ordering::SeqCst);
    }

    /// Retire `generation` if it is the live one
    fn retire(&self, generation: u64) -> bool {
        self.live
            .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

struct AmqpInner {
    endpoint: String,
    policy: ReconnectPolicy,
    connection: Mutex<Option<Arc<Connection>>>,
    channel: Mutex<Option<lapin::Channel>>,
    events: Mutex<Option<EventSender>>,
    topology: Mutex<Topology>,
    generations: Generations,
    connecting: AtomicBool,
    closed: AtomicBool,
}

impl AmqpInner {
    fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    async fn connect_loop(self: Arc<Self>) {
        let mut attempt = 0u32;
        while !self.closed.load(Ordering::SeqCst) {
            match self.open().await {
                Ok(()) => {
                    self.emit(TransportEvent::Ready);
                    break;
                }
                Err(e) => {
                    self.emit(TransportEvent::Error(e.to_string()));
                    let delay = self.policy.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying AMQP connection");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        self.connecting.store(false, Ordering::SeqCst);
    }

    async fn open(self: &Arc<Self>) -> MessagingResult<()> {
        let connection = Connection::connect(&self.endpoint, ConnectionProperties::default()).await?;
        let generation = self.generations.begin();

        let weak: Weak<AmqpInner> = Arc::downgrade(self);
        connection.on_error(move |err| {
            if let Some(inner) = weak.upgrade() {
                inner.on_connection_lost(generation, err.to_string());
            }
        });

        let channel = match self.prepare(&connection).await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(200, "Setup failed").await {
                    tracing::debug!(generation, error = %close_err, "Close after failed AMQP setup");
                }
                return Err(e);
            }
        };

        let connection = Arc::new(connection);
        *self.channel.lock() = Some(channel);
        *self.connection.lock() = Some(connection.clone());
        self.generations.promote(generation);

        // An error between setup and promotion was ignored as stale
        if !connection.status().connected() && self.generations.retire(generation) {
            self.channel.lock().take();
            self.connection.lock().take();
            return Err(MessagingError::ConnectionFailed(format!(
                "{} closed during setup",
                redact_endpoint(&self.endpoint)
            )));
        }
        Ok(())
    }

    async fn prepare(&self, connection: &Connection) -> MessagingResult<lapin::Channel> {
        let channel = connection.create_channel().await?;
        let topology = self.topology.lock().clone();
        restore_topology(&channel, &topology).await?;
        Ok(channel)
    }

    fn on_connection_lost(&self, generation: u64, error: String) {
        if !self.generations.retire(generation) {
            tracing::debug!(generation, error = %error, "Ignoring error from a stale AMQP connection");
            return;
        }

        self.channel.lock().take();
        self.connection.lock().take();
        self.emit(TransportEvent::Error(error));
        if !self.closed.load(Ordering::SeqCst) {
            self.emit(TransportEvent::End);
        }
    }

    fn spawn_connect(self: &Arc<Self>) {
        if self.connecting.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(self.clone().connect_loop());
    }
}

/// Transport speaking AMQP 0-9-1 to a RabbitMQ-compatible broker
pub struct AmqpTransport {
    inner: Arc<AmqpInner>,
}

impl AmqpTransport {
    pub fn new(endpoint: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(AmqpInner {
                endpoint: endpoint.into(),
                policy,
                connection: Mutex::new(None),
                channel: Mutex::new(None),
                events: Mutex::new(None),
                topology: Mutex::new(Topology::default()),
                generations: Generations::default(),
                connecting: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    async fn start(&self, events: EventSender) -> MessagingResult<()> {
        *self.inner.events.lock() = Some(events);
        self.inner.spawn_connect();
        Ok(())
    }

    async fn reconnect(&self) {
        self.inner.spawn_connect();
    }

    async fn close(&self) -> MessagingResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.generations.promote(0);
        self.inner.channel.lock().take();
        let connection = self.inner.connection.lock().take();

        if let Some(connection) = connection {
            connection
                .close(200, "Bye")
                .await
                .map_err(|e| MessagingError::ConnectionFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn channel(&self) -> MessagingResult<Arc<dyn Channel>> {
        let channel = self
            .inner
            .channel
            .lock()
            .clone()
            .ok_or_else(|| MessagingError::NotConnected(redact_endpoint(&self.inner.endpoint)))?;

        Ok(Arc::new(AmqpChannel {
            inner: self.inner.clone(),
            channel,
        }))
    }
}

struct AmqpChannel {
    inner: Arc<AmqpInner>,
    channel: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_exchange(&self, name: &str, options: &ExchangeOptions) -> MessagingResult<()> {
        declare_exchange(&self.channel, name, options).await?;
        self.inner.topology.lock().remember_exchange(name, options);
        Ok(())
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> MessagingResult<()> {
        declare_queue(&self.channel, name, options).await?;
        self.inner.topology.lock().remember_queue(name, options);
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str) -> MessagingResult<()> {
        bind_queue(&self.channel, queue, exchange, binding_key).await?;
        self.inner
            .topology
            .lock()
            .remember_binding(queue, exchange, binding_key);
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> MessagingResult<()> {
        let _confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| MessagingError::PublishFailed(e.to_string()))?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> MessagingResult<DeliveryStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        start_consumer(&self.channel, queue, sender.clone()).await?;
        self.inner
            .topology
            .lock()
            .consumers
            .push((queue.to_string(), sender));
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

fn exchange_kind(kind: ExchangeType) -> ExchangeKind {
    match kind {
        ExchangeType::Direct => ExchangeKind::Direct,
        ExchangeType::Fanout => ExchangeKind::Fanout,
        ExchangeType::Topic => ExchangeKind::Topic,
    }
}

async fn declare_exchange(
    channel: &lapin::Channel,
    name: &str,
    options: &ExchangeOptions,
) -> MessagingResult<()> {
    channel
        .exchange_declare(
            name,
            exchange_kind(options.kind),
            ExchangeDeclareOptions {
                durable: options.durable,
                auto_delete: options.auto_delete,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::DeclareFailed(format!("exchange '{}': {}", name, e)))
}

async fn declare_queue(
    channel: &lapin::Channel,
    name: &str,
    options: &QueueOptions,
) -> MessagingResult<()> {
    channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable: options.durable,
                auto_delete: options.auto_delete,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map(|_| ())
        .map_err(|e| MessagingError::DeclareFailed(format!("queue '{}': {}", name, e)))
}

async fn bind_queue(
    channel: &lapin::Channel,
    queue: &str,
    exchange: &str,
    binding_key: &str,
) -> MessagingResult<()> {
    channel
        .queue_bind(
            queue,
            exchange,
            binding_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| {
            MessagingError::BindFailed(format!("{} -> {} ({}): {}", exchange, queue, binding_key, e))
        })
}

async fn start_consumer(
    channel: &lapin::Channel,
    queue: &str,
    sender: mpsc::UnboundedSender<Vec<u8>>,
) -> MessagingResult<()> {
    let tag = format!("{}-{}", queue, Uuid::new_v4());
    let mut consumer = channel
        .basic_consume(
            queue,
            &tag,
            BasicConsumeOptions {
                no_ack: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::SubscribeFailed(format!("queue '{}': {}", queue, e)))?;

    let queue = queue.to_string();
    tokio::spawn(async move {
        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => {
                    if sender.send(delivery.data).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "AMQP consumer stopped");
                    break;
                }
            }
        }
    });
    Ok(())
}

async fn restore_topology(channel: &lapin::Channel, topology: &Topology) -> MessagingResult<()> {
    for (name, options) in &topology.exchanges {
        declare_exchange(channel, name, options).await?;
    }
    for (name, options) in &topology.queues {
        declare_queue(channel, name, options).await?;
    }
    for (queue, exchange, key) in &topology.bindings {
        bind_queue(channel, queue, exchange, key).await?;
    }
    for (queue, sender) in &topology.consumers {
        if !sender.is_closed() {
            start_consumer(channel, queue, sender.clone()).await?;
        }
    }

    if !topology.exchanges.is_empty() || !topology.consumers.is_empty() {
        tracing::info!(
            exchanges = topology.exchanges.len(),
            queues = topology.queues.len(),
            consumers = topology.consumers.len(),
            "Restored AMQP topology"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_deduplicates() {
        let mut topology = Topology::default();
        topology.remember_exchange("logs", &ExchangeOptions::default());
        topology.remember_exchange("logs", &ExchangeOptions::default());
        topology.remember_queue("applog", &QueueOptions::default());
        topology.remember_binding("applog", "logs", "app");
        topology.remember_binding("applog", "logs", "app");
        topology.remember_binding("applog", "logs", "#");

        assert_eq!(topology.exchanges.len(), 1);
        assert_eq!(topology.queues.len(), 1);
        assert_eq!(topology.bindings.len(), 2);
    }

    #[test]
    fn test_stale_generation_cannot_retire_live() {
        let generations = Generations::default();
        let failed_setup = generations.begin();
        let live = generations.begin();
        generations.promote(live);

        assert!(!generations.retire(failed_setup));
        assert!(generations.retire(live));
        assert!(!generations.retire(live));
    }

    #[tokio::test]
    async fn test_stale_connection_error_keeps_live_state() {
        let transport = AmqpTransport::new("amqp://localhost:5672", ReconnectPolicy::default());
        let (events, mut received) = mpsc::unbounded_channel();
        *transport.inner.events.lock() = Some(events);

        let stale = transport.inner.generations.begin();
        let live = transport.inner.generations.begin();
        transport.inner.generations.promote(live);

        transport.inner.on_connection_lost(stale, "stale socket reset".to_string());
        assert!(received.try_recv().is_err());

        transport.inner.on_connection_lost(live, "socket reset".to_string());
        assert_eq!(
            received.try_recv().unwrap(),
            TransportEvent::Error("socket reset".to_string())
        );
        assert_eq!(received.try_recv().unwrap(), TransportEvent::End);
    }

    #[tokio::test]
    async fn test_channel_unavailable_before_connect() {
        let transport = AmqpTransport::new("amqp://localhost:5672", ReconnectPolicy::default());
        assert!(matches!(
            transport.channel().await,
            Err(MessagingError::NotConnected(_))
        ));
    }
}
