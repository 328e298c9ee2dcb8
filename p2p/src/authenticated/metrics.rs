use crate::Channel;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Peer {
    pub peer: String,
}

impl Peer {
    pub fn new(peer: u32) -> Self {
        Self {
            peer: peer.to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Message {
    pub peer: String,
    pub message: i32,
}

impl Message {
    const INVALID_MESSAGE_TYPE: i32 = -1;

    pub fn new_data(peer: u32, channel: Channel) -> Self {
        Self {
            peer: peer.to_string(),
            message: channel as i32,
        }
    }

    pub fn new_invalid(peer: u32) -> Self {
        Self {
            peer: peer.to_string(),
            message: Self::INVALID_MESSAGE_TYPE,
        }
    }
}

/// Metrics shared by the router and its actors.
#[derive(Default)]
pub struct Metrics {
    pub messages_sent: Family<Message, Counter>,
    pub messages_received: Family<Message, Counter>,
    pub dial_attempts: Family<Peer, Counter>,
    pub send_failures: Family<Peer, Counter>,
    pub rejected_handshakes: Counter,
    pub connections: Gauge,
}

impl Metrics {
    pub fn init(registry: &Arc<Mutex<Registry>>) -> Self {
        let metrics = Self::default();
        let mut registry = registry.lock().unwrap();
        registry.register(
            "messages_sent",
            "messages sent to peers",
            metrics.messages_sent.clone(),
        );
        registry.register(
            "messages_received",
            "messages received from peers",
            metrics.messages_received.clone(),
        );
        registry.register(
            "dial_attempts",
            "attempts to dial peers",
            metrics.dial_attempts.clone(),
        );
        registry.register(
            "send_failures",
            "messages that could not be delivered",
            metrics.send_failures.clone(),
        );
        registry.register(
            "rejected_handshakes",
            "inbound connections rejected during the handshake",
            metrics.rejected_handshakes.clone(),
        );
        registry.register(
            "connections",
            "inbound connections currently open",
            metrics.connections.clone(),
        );
        metrics
    }
}
