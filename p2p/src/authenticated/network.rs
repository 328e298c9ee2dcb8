//! Route messages between this node and its peers.

use super::{
    actors::{
        listener::{self, Channels},
        peer,
    },
    metrics::Metrics,
    Config, Error,
};
use crate::{Channel, Receiver};
use beacon_codec::EncodeSize;
use beacon_utils::signal::{Signal, Signaler};
use bytes::Bytes;
use futures::{channel::mpsc, future::join_all};
use governor::{DefaultKeyedRateLimiter, RateLimiter};
use std::{
    collections::{hash_map::Entry, HashMap},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{debug, info};

/// Sends and receives messages on [Channel]s shared with a fixed set of authenticated peers.
///
/// Outbound messages to each peer are written, in order, by a dedicated actor that
/// dials the peer on first use and redials after a failure. Inbound connections
/// are accepted once [Router::listen] has been called.
pub struct Router {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    dial_limiter: Arc<DefaultKeyedRateLimiter<u32>>,

    channels: Channels,
    peers: Mutex<HashMap<u32, peer::Mailbox>>,

    signaler: Mutex<Option<Signaler>>,
    signal: Signal,
    listening: AtomicBool,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Router {
    /// Create a new router.
    ///
    /// Fails if `config.me` is not a member of `config.peers`.
    pub fn new(config: Config) -> Result<Self, Error> {
        if !config.peers.contains_key(&config.me) {
            return Err(Error::UnknownPeer(config.me));
        }
        let metrics = Arc::new(Metrics::init(&config.registry));
        let dial_limiter = Arc::new(RateLimiter::keyed(config.dial_rate));
        let (signaler, signal) = Signaler::new();
        Ok(Self {
            config: Arc::new(config),
            metrics,
            dial_limiter,

            channels: Arc::new(Mutex::new(HashMap::new())),
            peers: Mutex::new(HashMap::new()),

            signaler: Mutex::new(Some(signaler)),
            signal,
            listening: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Index of this node.
    pub fn me(&self) -> u32 {
        self.config.me
    }

    /// Indices of all other peers.
    pub fn peers(&self) -> Vec<u32> {
        self.config
            .peers
            .keys()
            .copied()
            .filter(|peer| *peer != self.config.me)
            .collect()
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Register a channel, returning the receiver for messages sent on it.
    ///
    /// Messages that arrive for a channel before it is registered are dropped.
    pub fn register(&self, channel: Channel) -> Result<Receiver, Error> {
        self.check_open()?;
        let mut channels = self.channels.lock().unwrap();
        match channels.entry(channel) {
            Entry::Occupied(_) => Err(Error::ChannelAlreadyRegistered(channel)),
            Entry::Vacant(entry) => {
                let (sender, receiver) = mpsc::channel(self.config.mailbox_size);
                entry.insert(sender);
                Ok(receiver)
            }
        }
    }

    /// Start accepting connections on this node's address, returning the bound address.
    pub async fn listen(&self) -> Result<SocketAddr, Error> {
        self.check_open()?;
        if self.listening.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyListening);
        }
        let address = self.config.peers[&self.config.me].address;
        let listener = match TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(err) => {
                self.listening.store(false, Ordering::Release);
                return Err(Error::BindFailed(err));
            }
        };
        let local = listener.local_addr().map_err(Error::BindFailed)?;

        let actor = listener::Actor::new(
            self.config.clone(),
            self.metrics.clone(),
            self.channels.clone(),
            listener,
        );
        let handle = tokio::spawn(actor.run(self.signal.clone()));
        self.tasks.lock().unwrap().push(handle);
        info!(me = self.config.me, address = ?local, "listening");
        Ok(local)
    }

    /// Returns the mailbox of the actor delivering to `recipient`, starting it if needed.
    fn mailbox(&self, recipient: u32) -> Result<peer::Mailbox, Error> {
        self.check_open()?;
        if recipient == self.config.me {
            return Err(Error::SelfSend);
        }
        let Some(info) = self.config.peers.get(&recipient) else {
            return Err(Error::UnknownPeer(recipient));
        };

        let mut peers = self.peers.lock().unwrap();
        if let Some(mailbox) = peers.get(&recipient) {
            return Ok(mailbox.clone());
        }
        let (actor, mailbox) = peer::Actor::new(
            self.config.clone(),
            self.metrics.clone(),
            self.dial_limiter.clone(),
            recipient,
            info.address,
        );
        let handle = tokio::spawn(actor.run(self.signal.clone()));
        self.tasks.lock().unwrap().push(handle);
        peers.insert(recipient, mailbox.clone());
        debug!(peer = recipient, "started peer actor");
        Ok(mailbox)
    }

    /// Send `message` to `recipient` on `channel`.
    ///
    /// Resolves once the message has been written to the peer's connection or
    /// every delivery attempt has failed.
    pub async fn send(&self, channel: Channel, recipient: u32, message: Bytes) -> Result<(), Error> {
        let data_size = channel.encode_size() + message.encode_size();
        if data_size > self.config.max_message_size {
            return Err(Error::MessageTooLarge(data_size));
        }
        let mut mailbox = self.mailbox(recipient)?;
        mailbox.send(channel, message).await
    }

    /// Send `message` to every other peer, returning the peers it was delivered to.
    pub async fn broadcast(&self, channel: Channel, message: Bytes) -> Result<Vec<u32>, Error> {
        self.check_open()?;
        let sends = self.peers().into_iter().map(|recipient| {
            let message = message.clone();
            async move { (recipient, self.send(channel, recipient, message).await) }
        });
        let mut delivered = Vec::new();
        for (recipient, result) in join_all(sends).await {
            match result {
                Ok(()) => delivered.push(recipient),
                Err(err) => debug!(peer = recipient, channel, ?err, "broadcast not delivered"),
            }
        }
        Ok(delivered)
    }

    /// Stop all actors and close every registered channel.
    ///
    /// Safe to call more than once. Later operations fail with [Error::Closed].
    pub async fn stop(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(signaler) = self.signaler.lock().unwrap().take() {
            signaler.signal(0);
        }
        self.peers.lock().unwrap().clear();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            if let Err(err) = task.await {
                debug!(?err, "task failed");
            }
        }
        self.channels.lock().unwrap().clear();
        info!(me = self.config.me, "router stopped");
    }
}
