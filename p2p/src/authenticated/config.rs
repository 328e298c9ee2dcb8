use beacon_cryptography::bls12381::primitives::group;
use governor::Quota;
use prometheus_client::registry::Registry;
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    num::NonZeroU32,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Default namespace for handshakes.
pub const DEFAULT_NAMESPACE: &[u8] = b"_BEACON_P2P";

/// A member of the peer set.
#[derive(Clone, Debug)]
pub struct Peer {
    /// Address the peer listens on.
    pub address: SocketAddr,

    /// Key the peer signs handshakes with.
    pub public: group::Public,
}

/// Configuration for a [super::Router].
#[derive(Clone)]
pub struct Config {
    /// Index of this node in `peers`.
    pub me: u32,

    /// Key used to sign handshakes.
    pub signer: group::Private,

    /// All nodes (including this one), by index.
    pub peers: BTreeMap<u32, Peer>,

    /// Prefix for all signed messages to prevent replay attacks.
    pub namespace: Vec<u8>,

    /// Registry for prometheus metrics.
    pub registry: Arc<Mutex<Registry>>,

    /// Maximum size allowed for a frame, after encoding.
    pub max_message_size: usize,

    /// Size of the backlog held for each registered channel and each outbound peer.
    pub mailbox_size: usize,

    /// Time allowed to establish a TCP connection.
    pub dial_timeout: Duration,

    /// Attempts made to deliver a message before giving up.
    pub dial_attempts: usize,

    /// Pause between failed delivery attempts.
    pub dial_backoff: Duration,

    /// Quota for dials to each peer.
    pub dial_rate: Quota,

    /// Time allowed to write a frame to a connection.
    pub write_timeout: Duration,

    /// Time allowed for a dialer to present its handshake.
    pub handshake_timeout: Duration,

    /// Maximum amount a handshake timestamp may be ahead of local time.
    pub synchrony_bound: Duration,

    /// Maximum age of a handshake timestamp.
    pub max_handshake_age: Duration,
}

impl Config {
    /// Generates a configuration with reasonable defaults for usage in production.
    pub fn recommended(
        me: u32,
        signer: group::Private,
        peers: BTreeMap<u32, Peer>,
        registry: Arc<Mutex<Registry>>,
    ) -> Self {
        Self {
            me,
            signer,
            peers,
            namespace: DEFAULT_NAMESPACE.to_vec(),
            registry,

            max_message_size: 1024 * 1024, // 1 MB
            mailbox_size: 1_000,
            dial_timeout: Duration::from_secs(5),
            dial_attempts: 3,
            dial_backoff: Duration::from_secs(1),
            dial_rate: Quota::per_second(NonZeroU32::new(30).unwrap()),
            write_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            synchrony_bound: Duration::from_secs(5),
            max_handshake_age: Duration::from_secs(10),
        }
    }

    /// Generates a configuration that minimizes peer discovery latency. This
    /// can be useful when running local demos.
    ///
    /// # Warning
    ///
    /// It is not recommended to use this configuration in production.
    pub fn aggressive(
        me: u32,
        signer: group::Private,
        peers: BTreeMap<u32, Peer>,
        registry: Arc<Mutex<Registry>>,
    ) -> Self {
        Self {
            dial_timeout: Duration::from_millis(500),
            dial_attempts: 2,
            dial_backoff: Duration::from_millis(100),
            dial_rate: Quota::per_second(NonZeroU32::new(1_000).unwrap()),
            write_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(1),
            ..Self::recommended(me, signer, peers, registry)
        }
    }
}
