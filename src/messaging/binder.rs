//! Exchange/queue declaration plus publish and subscribe.
//!
//! The binder never retries. Every failure comes back to the caller, and
//! recovering the transport is the connection manager's job.

use crate::messaging::config::{ExchangeOptions, PublishOptions, SubscribeOptions};
use crate::messaging::connection::ConnectionManager;
use crate::messaging::error::MessagingResult;
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::transport::{MessageHandler, Payload};
use futures::StreamExt;
use std::sync::Arc;

/// Publish/subscribe front end over a shared [`ConnectionManager`]
#[derive(Clone)]
pub struct Binder {
    connection: Arc<ConnectionManager>,
}

impl Binder {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Declare an exchange. Declaring an existing exchange with the same
    /// options is a no-op.
    pub async fn create_exchange(&self, name: &str, options: &ExchangeOptions) -> MessagingResult<()> {
        let channel = self.connection.channel().await?;
        channel.declare_exchange(name, options).await?;
        tracing::debug!(exchange = name, kind = %options.kind, durable = options.durable, "Exchange declared");
        Ok(())
    }

    /// Declare `queue`, bind it when an exchange is given and attach `handler`
    /// as its consumer.
    ///
    /// Bodies are decoded with [`Payload::decode`]; empty bodies are dropped
    /// before reaching the handler.
    pub async fn subscribe<H>(
        &self,
        queue: &str,
        options: &SubscribeOptions,
        handler: H,
    ) -> MessagingResult<()>
    where
        H: MessageHandler,
    {
        let channel = self.connection.channel().await?;
        channel.declare_queue(queue, &options.queue).await?;

        if let Some((exchange, binding_key)) = options.effective_binding() {
            channel.bind_queue(queue, exchange, binding_key).await?;
            tracing::debug!(queue, exchange, binding_key, "Queue bound");
        }

        let mut deliveries = channel.consume(queue).await?;
        let queue_name = queue.to_string();
        tokio::spawn(async move {
            while let Some(body) = deliveries.next().await {
                let Some(payload) = Payload::decode(&body) else {
                    continue;
                };
                MESSAGING_METRICS
                    .messages_consumed
                    .with_label_values(&[&queue_name])
                    .inc();
                handler.handle(payload).await;
            }
            tracing::debug!(queue = %queue_name, "Consumer stream closed");
        });

        Ok(())
    }

    /// Declare `exchange` and publish `message` to it.
    ///
    /// Text goes out unchanged, anything else as JSON. Resolves once the
    /// publish is issued; no broker acknowledgement is awaited.
    pub async fn publish(
        &self,
        message: impl Into<Payload>,
        exchange: &str,
        options: &PublishOptions,
    ) -> MessagingResult<()> {
        let body = message.into().encode()?;
        let result = self.publish_body(body, exchange, options).await;

        let labels = [exchange, options.routing_key.as_str()];
        match &result {
            Ok(()) => MESSAGING_METRICS.messages_published.with_label_values(&labels).inc(),
            Err(_) => MESSAGING_METRICS.publish_failures.with_label_values(&labels).inc(),
        }
        result
    }

    async fn publish_body(
        &self,
        body: Vec<u8>,
        exchange: &str,
        options: &PublishOptions,
    ) -> MessagingResult<()> {
        let channel = self.connection.channel().await?;
        channel.declare_exchange(exchange, &options.exchange).await?;
        channel.publish(exchange, &options.routing_key, body).await
    }
}
