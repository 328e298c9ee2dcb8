//! Communicate with a fixed set of authenticated peers over TCP.
//!
//! # Design
//!
//! Every node in the peer set is identified by its index and a BLS12-381 public key,
//! both known in advance. Connections are unidirectional: a node dials a peer to
//! send to it and accepts connections to receive. Each pair of nodes therefore
//! communicates over (at most) two connections.
//!
//! ## Handshake
//!
//! The first frame sent on a new connection is a [types::Hello] carrying the dialer,
//! the recipient, a timestamp (milliseconds since the unix epoch) and a signature over
//! all three (under `namespace || "_HELLO"`). The recipient drops the connection if
//! the hello is addressed to someone else, comes from an unknown peer, is older than
//! `max_handshake_age`, is further than `synchrony_bound` in the future, or carries an
//! invalid signature.
//!
//! ## Framing
//!
//! All frames are prefixed with their length (u32, big-endian) and may not exceed
//! `max_message_size`. After the handshake, each frame holds a [types::Data]: the
//! [crate::Channel] and the payload.
//!
//! ## Delivery
//!
//! Outbound messages to a peer are written, in order, by a dedicated actor. If there
//! is no connection (or writing to it fails), the actor dials the peer again, up to
//! `dial_attempts` times with `dial_backoff` between attempts. Dials to each peer
//! are rate limited by `dial_rate`. A message that cannot be written is reported as
//! undelivered to the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use beacon_cryptography::bls12381::primitives::ops::keypair;
//! use beacon_p2p::{Config, Peer, Router};
//! use bytes::Bytes;
//! use futures::StreamExt;
//! use prometheus_client::registry::Registry;
//! use rand::rngs::OsRng;
//! use std::{collections::BTreeMap, sync::{Arc, Mutex}};
//!
//! # async fn run() {
//! let (private, public) = keypair(&mut OsRng);
//! let (_, other) = keypair(&mut OsRng);
//! let peers = BTreeMap::from([
//!     (0, Peer { address: "127.0.0.1:3000".parse().unwrap(), public }),
//!     (1, Peer { address: "127.0.0.1:3001".parse().unwrap(), public: other }),
//! ]);
//! let registry = Arc::new(Mutex::new(Registry::default()));
//! let router = Router::new(Config::recommended(0, private, peers, registry)).unwrap();
//!
//! let mut receiver = router.register(0).unwrap();
//! router.listen().await.unwrap();
//! router.send(0, 1, Bytes::from_static(b"hello")).await.unwrap();
//! let (sender, message) = receiver.next().await.unwrap();
//! router.stop().await;
//! # }
//! ```

mod actors;
mod config;
mod connection;
mod metrics;
mod network;
pub mod types;

use crate::Channel;
pub use config::{Config, Peer, DEFAULT_NAMESPACE};
pub use network::Router;
use thiserror::Error;

/// Errors that can occur when interacting with the network.
#[derive(Error, Debug)]
pub enum Error {
    #[error("router closed")]
    Closed,
    #[error("already listening")]
    AlreadyListening,
    #[error("bind failed: {0}")]
    BindFailed(std::io::Error),
    #[error("cannot send to self")]
    SelfSend,
    #[error("unknown peer: {0}")]
    UnknownPeer(u32),
    #[error("peer unreachable: {0}")]
    Unreachable(u32),
    #[error("message too large: {0}")]
    MessageTooLarge(usize),
    #[error("channel already registered: {0}")]
    ChannelAlreadyRegistered(Channel),
    #[error("dial rate limited")]
    RateLimited,
    #[error("dial failed: {0}")]
    DialFailed(std::io::Error),
    #[error("dial timed out")]
    DialTimeout,
    #[error("write timed out")]
    WriteTimeout,
    #[error("send zero size")]
    SendZeroSize,
    #[error("send too large: {0}")]
    SendTooLarge(usize),
    #[error("send failed: {0}")]
    SendFailed(std::io::Error),
    #[error("recv zero size")]
    RecvZeroSize,
    #[error("recv too large: {0}")]
    RecvTooLarge(usize),
    #[error("recv failed: {0}")]
    RecvFailed(std::io::Error),
    #[error("handshake addressed to {0}")]
    WrongRecipient(u32),
    #[error("handshake from self")]
    HandshakeFromSelf,
    #[error("invalid handshake timestamp: {0}")]
    InvalidTimestamp(u64),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("codec: {0}")]
    Codec(#[from] beacon_codec::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_cryptography::bls12381::primitives::{group, ops::keypair};
    use bytes::Bytes;
    use futures::StreamExt;
    use governor::Quota;
    use prometheus_client::{encoding::text::encode, registry::Registry};
    use rand::{rngs::StdRng, SeedableRng};
    use std::{
        collections::BTreeMap,
        net::TcpListener,
        num::NonZeroU32,
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tokio::time::timeout;

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn configs(n: u32, seed: u64) -> Vec<Config> {
        let mut rng = StdRng::seed_from_u64(seed);
        let keys: Vec<(group::Private, group::Public)> =
            (0..n).map(|_| keypair(&mut rng)).collect();
        let peers: BTreeMap<u32, Peer> = keys
            .iter()
            .enumerate()
            .map(|(i, (_, public))| {
                let peer = Peer {
                    address: ([127, 0, 0, 1], free_port()).into(),
                    public: *public,
                };
                (i as u32, peer)
            })
            .collect();
        keys.into_iter()
            .enumerate()
            .map(|(i, (private, _))| {
                let registry = Arc::new(Mutex::new(Registry::default()));
                Config::aggressive(i as u32, private, peers.clone(), registry)
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exchange() {
        let configs = configs(3, 0);
        let registry = configs[0].registry.clone();
        let routers: Vec<Router> = configs
            .into_iter()
            .map(|config| Router::new(config).unwrap())
            .collect();
        let mut receivers = Vec::new();
        for router in &routers {
            receivers.push((router.register(0).unwrap(), router.register(1).unwrap()));
        }
        for router in &routers {
            router.listen().await.unwrap();
        }

        // Messages on a channel arrive in order
        for i in 0..100u32 {
            let message = Bytes::copy_from_slice(&i.to_be_bytes());
            routers[0].send(0, 1, message).await.unwrap();
        }
        for i in 0..100u32 {
            let (sender, message) = receivers[1].0.next().await.unwrap();
            assert_eq!(sender, 0);
            assert_eq!(message.as_ref(), i.to_be_bytes());
        }

        // Channels are independent
        routers[2]
            .send(1, 1, Bytes::from_static(b"other"))
            .await
            .unwrap();
        let (sender, message) = receivers[1].1.next().await.unwrap();
        assert_eq!(sender, 2);
        assert_eq!(message, Bytes::from_static(b"other"));

        // Broadcast reaches everyone else
        let delivered = routers[1]
            .broadcast(0, Bytes::from_static(b"all"))
            .await
            .unwrap();
        assert_eq!(delivered, vec![0, 2]);
        for i in [0, 2] {
            let (sender, message) = receivers[i].0.next().await.unwrap();
            assert_eq!(sender, 1);
            assert_eq!(message, Bytes::from_static(b"all"));
        }

        let mut buffer = String::new();
        encode(&mut buffer, &registry.lock().unwrap()).unwrap();
        assert!(buffer.contains("messages_sent_total{peer=\"1\",message=\"0\"} 100"));

        for router in &routers {
            router.stop().await;
        }
    }

    #[tokio::test]
    async fn test_errors() {
        let mut configs = configs(2, 1);
        let mut outsider = configs[0].clone();
        outsider.me = 5;
        assert!(matches!(Router::new(outsider), Err(Error::UnknownPeer(5))));

        configs[0].max_message_size = 64;
        let config = configs.remove(0);
        let router = Router::new(config.clone()).unwrap();
        let mut receiver = router.register(0).unwrap();
        assert!(matches!(
            router.register(0),
            Err(Error::ChannelAlreadyRegistered(0))
        ));
        assert!(matches!(
            router.send(0, 0, Bytes::from_static(b"me")).await,
            Err(Error::SelfSend)
        ));
        assert!(matches!(
            router.send(0, 9, Bytes::from_static(b"who")).await,
            Err(Error::UnknownPeer(9))
        ));
        assert!(matches!(
            router.send(0, 1, Bytes::from(vec![0; 64])).await,
            Err(Error::MessageTooLarge(_))
        ));

        router.listen().await.unwrap();
        assert!(matches!(router.listen().await, Err(Error::AlreadyListening)));

        // Address already taken
        let twin = Router::new(config).unwrap();
        assert!(matches!(twin.listen().await, Err(Error::BindFailed(_))));
        twin.stop().await;

        // Peer 1 never listens
        assert!(router.send(0, 1, Bytes::from_static(b"lost")).await.is_err());
        assert!(router
            .broadcast(0, Bytes::from_static(b"lost"))
            .await
            .unwrap()
            .is_empty());

        router.stop().await;
        router.stop().await;
        assert!(receiver.next().await.is_none());
        assert!(matches!(
            router.send(0, 1, Bytes::from_static(b"late")).await,
            Err(Error::Closed)
        ));
        assert!(matches!(
            router.broadcast(0, Bytes::from_static(b"late")).await,
            Err(Error::Closed)
        ));
        assert!(matches!(router.register(1), Err(Error::Closed)));
        assert!(matches!(router.listen().await, Err(Error::Closed)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dial_rate_per_peer() {
        let mut configs = configs(3, 4);
        configs[0].dial_rate = Quota::per_hour(NonZeroU32::new(1).unwrap());
        let sender = Router::new(configs[0].clone()).unwrap();
        let live = Router::new(configs[1].clone()).unwrap();
        let mut receiver = live.register(0).unwrap();
        live.listen().await.unwrap();

        // Peer 2 never listens and uses up its only dial
        assert!(sender.send(0, 2, Bytes::from_static(b"lost")).await.is_err());

        // Peer 1 still gets its own dial
        sender.send(0, 1, Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(receiver.next().await.unwrap(), (0, Bytes::from_static(b"hi")));

        // Peer 2 stays limited
        assert!(matches!(
            sender.send(0, 2, Bytes::from_static(b"lost")).await,
            Err(Error::RateLimited)
        ));

        live.stop().await;
        sender.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_impostor_rejected() {
        let mut configs = configs(2, 2);
        let listener = Router::new(configs.remove(0)).unwrap();
        let mut receiver = listener.register(0).unwrap();
        listener.listen().await.unwrap();

        // Sign handshakes with a key that does not belong to peer 1
        let mut impostor = configs.remove(0);
        impostor.signer = keypair(&mut StdRng::seed_from_u64(99)).0;
        let impostor = Router::new(impostor).unwrap();
        let _ = impostor.send(0, 0, Bytes::from_static(b"forged")).await;
        assert!(timeout(Duration::from_millis(500), receiver.next())
            .await
            .is_err());

        impostor.stop().await;
        listener.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_redial_after_restart() {
        let configs = configs(2, 3);
        let sender = Router::new(configs[0].clone()).unwrap();
        let first = Router::new(configs[1].clone()).unwrap();
        let mut receiver = first.register(0).unwrap();
        first.listen().await.unwrap();
        sender.send(0, 1, Bytes::from_static(b"one")).await.unwrap();
        assert_eq!(receiver.next().await.unwrap().1, Bytes::from_static(b"one"));
        first.stop().await;

        // A restarted peer is reachable on the same address
        let second = Router::new(configs[1].clone()).unwrap();
        let mut receiver = second.register(0).unwrap();
        second.listen().await.unwrap();
        let received = timeout(Duration::from_secs(10), async {
            loop {
                let _ = sender.send(0, 1, Bytes::from_static(b"two")).await;
                if let Ok(Some(message)) =
                    timeout(Duration::from_millis(200), receiver.next()).await
                {
                    return message;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(received, (0, Bytes::from_static(b"two")));

        second.stop().await;
        sender.stop().await;
    }
}
