//! Binder behavior against the in-memory broker

use parking_lot::Mutex;
use serde_json::json;
use status_page::messaging::{
    Binder, BrokerOp, ConnectionManager, ExchangeOptions, ExchangeType, MemoryBroker,
    MemoryTransport, MessagingError, Payload, PublishOptions, QueueOptions, Readiness,
    SubscribeOptions,
};
use std::sync::Arc;
use std::time::Duration;

async fn binder(broker: &Arc<MemoryBroker>) -> Binder {
    let transport = Arc::new(MemoryTransport::new(broker.clone(), "memory://test"));
    let connection = ConnectionManager::connect(transport, Duration::from_millis(500))
        .await
        .unwrap();
    Binder::new(connection)
}

fn collector() -> (Arc<Mutex<Vec<Payload>>>, impl Fn(Payload) -> futures::future::Ready<()> + Send + Sync + 'static) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let handler = move |payload: Payload| {
        sink.lock().push(payload);
        futures::future::ready(())
    };
    (received, handler)
}

async fn wait_for(received: &Arc<Mutex<Vec<Payload>>>, count: usize) {
    for _ in 0..100 {
        if received.lock().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} deliveries, got {}", count, received.lock().len());
}

#[tokio::test]
async fn test_subscribe_binds_with_exact_key() {
    let broker = MemoryBroker::with_journal();
    let binder = binder(&broker).await;
    binder.create_exchange("logs", &ExchangeOptions::default()).await.unwrap();

    let (_, handler) = collector();
    binder
        .subscribe("q", &SubscribeOptions::bound_to("logs", "app"), handler)
        .await
        .unwrap();

    let journal = broker.journal();
    assert!(journal.contains(&BrokerOp::DeclareQueue {
        name: "q".into(),
        options: QueueOptions { durable: true, auto_delete: false },
    }));
    let binds: Vec<_> = journal
        .iter()
        .filter(|op| matches!(op, BrokerOp::Bind { .. }))
        .collect();
    assert_eq!(
        binds,
        vec![&BrokerOp::Bind {
            queue: "q".into(),
            exchange: "logs".into(),
            binding_key: "app".into(),
        }]
    );
}

#[tokio::test]
async fn test_subscribe_defaults_to_wildcard_key() {
    let broker = MemoryBroker::new();
    let binder = binder(&broker).await;
    binder.create_exchange("logs", &ExchangeOptions::default()).await.unwrap();

    let options = SubscribeOptions {
        exchange_name: Some("logs".into()),
        ..SubscribeOptions::default()
    };
    let (received, handler) = collector();
    binder.subscribe("everything", &options, handler).await.unwrap();

    assert_eq!(broker.bindings("everything"), vec![("logs".to_string(), "#".to_string())]);

    for key in ["app", "request"] {
        binder
            .publish(json!({"key": key}), "logs", &PublishOptions::with_routing_key(key))
            .await
            .unwrap();
    }
    wait_for(&received, 2).await;
}

#[tokio::test]
async fn test_subscribe_without_exchange_does_not_bind() {
    let broker = MemoryBroker::with_journal();
    let binder = binder(&broker).await;

    let (_, handler) = collector();
    binder.subscribe("standalone", &SubscribeOptions::default(), handler).await.unwrap();

    assert!(broker.bindings("standalone").is_empty());
    assert!(!broker.journal().iter().any(|op| matches!(op, BrokerOp::Bind { .. })));
}

#[tokio::test]
async fn test_publish_encodes_text_and_json() {
    let broker = MemoryBroker::with_journal();
    let binder = binder(&broker).await;
    let options = PublishOptions::with_routing_key("app");

    binder.publish("plain text", "logs", &options).await.unwrap();
    binder.publish(json!({"a": 1}), "logs", &options).await.unwrap();

    let bodies: Vec<Vec<u8>> = broker
        .journal()
        .into_iter()
        .filter_map(|op| match op {
            BrokerOp::Publish { body, .. } => Some(body),
            _ => None,
        })
        .collect();
    assert_eq!(bodies, vec![b"plain text".to_vec(), br#"{"a":1}"#.to_vec()]);

    // publish declares the exchange with default options first
    assert!(broker.journal().contains(&BrokerOp::DeclareExchange {
        name: "logs".into(),
        options: ExchangeOptions::default(),
    }));
}

#[tokio::test]
async fn test_delivery_decoding_and_order() {
    let broker = MemoryBroker::new();
    let binder = binder(&broker).await;
    binder.create_exchange("logs", &ExchangeOptions::default()).await.unwrap();

    let (received, handler) = collector();
    binder
        .subscribe("applog", &SubscribeOptions::bound_to("logs", "app"), handler)
        .await
        .unwrap();

    let options = PublishOptions::with_routing_key("app");
    binder.publish(json!({"n": 1}), "logs", &options).await.unwrap();
    binder.publish("", "logs", &options).await.unwrap();
    binder.publish("not json", "logs", &options).await.unwrap();
    binder.publish(json!({"n": 2}), "logs", &PublishOptions::with_routing_key("request")).await.unwrap();
    binder.publish(json!({"n": 3}), "logs", &options).await.unwrap();

    wait_for(&received, 3).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        *received.lock(),
        vec![
            Payload::Json(json!({"n": 1})),
            Payload::Text("not json".into()),
            Payload::Json(json!({"n": 3})),
        ]
    );
}

#[tokio::test]
async fn test_conflicting_exchange_declare_fails() {
    let broker = MemoryBroker::new();
    let binder = binder(&broker).await;
    binder.create_exchange("logs", &ExchangeOptions::default()).await.unwrap();

    let fanout = ExchangeOptions {
        kind: ExchangeType::Fanout,
        ..ExchangeOptions::default()
    };
    let err = binder.create_exchange("logs", &fanout).await.unwrap_err();
    assert!(matches!(err, MessagingError::DeclareFailed(_)));
}

#[tokio::test]
async fn test_publish_fails_while_reconnecting() {
    let broker = MemoryBroker::new();
    let transport = Arc::new(
        MemoryTransport::new(broker.clone(), "memory://test")
            .with_readiness(Readiness::After(Duration::from_millis(100))),
    );
    let connection = ConnectionManager::connect(transport.clone(), Duration::from_millis(500))
        .await
        .unwrap();
    let binder = Binder::new(connection.clone());
    let options = PublishOptions::with_routing_key("app");

    transport.simulate_drop();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = binder.publish("lost", "logs", &options).await.unwrap_err();
    assert!(matches!(err, MessagingError::NotConnected(_)));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(connection.is_ready());
    binder.publish("delivered", "logs", &options).await.unwrap();
}
