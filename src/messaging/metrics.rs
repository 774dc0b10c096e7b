//! Prometheus metrics for messaging

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec,
};

/// Messaging metrics
pub struct MessagingMetrics {
    /// Messages published counter
    pub messages_published: IntCounterVec,

    /// Messages delivered to a consumer
    pub messages_consumed: IntCounterVec,

    /// Message publish failures
    pub publish_failures: IntCounterVec,

    /// Policy-driven reconnects
    pub reconnects: IntCounterVec,

    /// 1 while the connection is ready, 0 otherwise
    pub connection_ready: IntGaugeVec,
}

lazy_static! {
    pub static ref MESSAGING_METRICS: MessagingMetrics = MessagingMetrics {
        messages_published: register_int_counter_vec!(
            "messaging_messages_published_total",
            "Total number of messages published",
            &["exchange", "routing_key"]
        )
        .unwrap(),

        messages_consumed: register_int_counter_vec!(
            "messaging_messages_consumed_total",
            "Total number of messages delivered to consumers",
            &["queue"]
        )
        .unwrap(),

        publish_failures: register_int_counter_vec!(
            "messaging_publish_failures_total",
            "Total number of publish failures",
            &["exchange", "routing_key"]
        )
        .unwrap(),

        reconnects: register_int_counter_vec!(
            "messaging_reconnects_total",
            "Total number of reconnects triggered after a dropped connection",
            &["endpoint"]
        )
        .unwrap(),

        connection_ready: register_int_gauge_vec!(
            "messaging_connection_ready",
            "Whether the broker connection is ready",
            &["endpoint"]
        )
        .unwrap(),
    };
}

/// Initialize messaging metrics
pub fn init_messaging_metrics() {
    lazy_static::initialize(&MESSAGING_METRICS);
}
