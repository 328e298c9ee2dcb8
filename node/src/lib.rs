//! Produce distributed randomness with a fixed group of nodes.
//!
//! A [Node] first runs a distributed key generation ([dkg]) with the rest of its [key::Group].
//! Once a group key is established, it joins a [beacon] that signs one chained message per
//! round with the group's threshold key. Each beacon is persisted in a [store::Store] and
//! handed to every registered [store::Observer].
//!
//! # Status
//!
//! `beacon-node` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.
//!
//! # Example
//!
//! ```no_run
//! use beacon_node::{key::{Group, Pair}, store::Memory, Config, Node};
//! use rand::rngs::OsRng;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), beacon_node::Error> {
//! let pairs: Vec<Pair> = (0..4)
//!     .map(|i| Pair::new(&mut OsRng, format!("127.0.0.1:{}", 3000 + i)))
//!     .collect();
//! let group = Group::with_default_threshold(pairs.iter().map(|p| p.public().clone()).collect())?;
//!
//! // Every node of the group runs the same steps (with its own identity)
//! let store = Arc::new(Memory::new(group.clone()));
//! let node = Node::new(Config::recommended(pairs[0].clone(), group, store)?)?;
//! node.listen().await?;
//!
//! // One node leads the DKG, the others call `run_dkg`
//! let output = node.start_dkg().await?;
//! println!("qualified dealers: {:?}", output.qualified);
//!
//! // Beacons are now produced in the background
//! node.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod beacon;
pub mod dkg;
pub mod key;
pub mod store;
pub mod telemetry;
pub mod wire;

use beacon_cryptography::bls12381::primitives::{
    group::{Private, Share},
    poly,
};
use beacon_p2p::{Peer, Receiver, Router};
use beacon_utils::signal::{Signal, Signaler};
use key::{Group, Pair};
use prometheus_client::registry::Registry;
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use store::{Observer, Store};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Errors that can occur when operating a [Node].
#[derive(Error, Debug)]
pub enum Error {
    #[error("identity not in group")]
    NotInGroup,
    #[error("dkg already run")]
    DkgAlreadyRun,
    #[error("beacon already running")]
    BeaconAlreadyRunning,
    #[error("no share stored")]
    MissingShare,
    #[error("no group public key stored")]
    MissingDistPublic,
    #[error("node stopped")]
    Stopped,
    #[error("key: {0}")]
    Key(#[from] key::Error),
    #[error("store: {0}")]
    Store(#[from] store::Error),
    #[error("network: {0}")]
    Network(#[from] beacon_p2p::Error),
    #[error("dkg: {0}")]
    Dkg(#[from] dkg::Error),
    #[error("beacon: {0}")]
    Beacon(#[from] beacon::Error),
}

/// Configuration for a [Node].
pub struct Config {
    /// This node's identity.
    pub identity: Pair,

    /// All participants (including this node).
    pub group: Group,

    /// Durable state of this node.
    pub store: Arc<dyn Store>,

    /// Notified of every beacon produced.
    pub observers: Vec<Arc<dyn Observer>>,

    /// Registry for prometheus metrics.
    pub registry: Arc<Mutex<Registry>>,

    /// Configuration of the network.
    pub network: beacon_p2p::Config,

    /// Duration of each DKG phase.
    pub phase_timeout: Duration,

    /// Time a DKG follower waits for the session to start.
    pub start_timeout: Duration,

    /// Time between the start of the DKG and the first beacon round.
    pub genesis_delay: Duration,

    /// Duration of each beacon round.
    pub period: Duration,

    /// Maximum number of early partials held for the next round.
    pub max_pending_partials: usize,
}

impl Config {
    fn with_network(
        identity: Pair,
        group: Group,
        store: Arc<dyn Store>,
        network: fn(u32, Private, BTreeMap<u32, Peer>, Arc<Mutex<Registry>>) -> beacon_p2p::Config,
    ) -> Result<Self, Error> {
        let me = group
            .index_of(&identity.public().key)
            .ok_or(Error::NotInGroup)?;
        let registry = Arc::new(Mutex::new(Registry::default()));
        let network = network(me, *identity.private(), group.peers()?, registry.clone());
        let max_pending_partials = 2 * group.len() as usize;
        Ok(Self {
            identity,
            group,
            store,
            observers: Vec::new(),
            registry,
            network,
            phase_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(60),
            genesis_delay: Duration::from_secs(30),
            period: Duration::from_secs(30),
            max_pending_partials,
        })
    }

    /// Generates a configuration with reasonable defaults for usage in production.
    pub fn recommended(identity: Pair, group: Group, store: Arc<dyn Store>) -> Result<Self, Error> {
        Self::with_network(identity, group, store, beacon_p2p::Config::recommended)
    }

    /// Generates a configuration with short phases and rounds, useful for local testing.
    ///
    /// # Warning
    ///
    /// It is not recommended to use this configuration in production.
    pub fn aggressive(identity: Pair, group: Group, store: Arc<dyn Store>) -> Result<Self, Error> {
        Ok(Self {
            phase_timeout: Duration::from_secs(1),
            start_timeout: Duration::from_secs(10),
            genesis_delay: Duration::from_secs(3),
            period: Duration::from_secs(1),
            ..Self::with_network(identity, group, store, beacon_p2p::Config::aggressive)?
        })
    }
}

/// A member of the group: runs the DKG, then produces beacons until stopped.
pub struct Node {
    index: u32,
    group: Group,
    store: Arc<dyn Store>,
    observers: Vec<Arc<dyn Observer>>,
    registry: Arc<Mutex<Registry>>,
    period: Duration,
    max_pending_partials: usize,

    router: Arc<Router>,
    dkg: dkg::Engine,
    dkg_receiver: Mutex<Option<Receiver>>,
    beacon_receiver: Mutex<Option<Receiver>>,
    beacon: Mutex<Option<JoinHandle<Result<(), beacon::Error>>>>,

    signaler: Mutex<Option<Signaler>>,
    signal: Signal,
    stopped: AtomicBool,
}

impl Node {
    /// Create a new node. The node does not accept connections until [Node::listen] is called.
    pub fn new(config: Config) -> Result<Self, Error> {
        let index = config
            .group
            .index_of(&config.identity.public().key)
            .ok_or(Error::NotInGroup)?;
        if config.network.me != index {
            return Err(Error::NotInGroup);
        }
        if config.store.load_key()?.is_none() {
            config.store.save_key(&config.identity)?;
        }

        let router = Router::new(config.network)?;
        let dkg_receiver = router.register(wire::DKG_CHANNEL)?;
        let beacon_receiver = router.register(wire::BEACON_CHANNEL)?;
        let dkg = dkg::Engine::new(dkg::Config {
            identity: config.identity,
            group: config.group.clone(),
            phase_timeout: config.phase_timeout,
            start_timeout: config.start_timeout,
            genesis_delay: config.genesis_delay,
            registry: config.registry.clone(),
        })
        .ok_or(Error::NotInGroup)?;

        let (signaler, signal) = Signaler::new();
        Ok(Self {
            index,
            group: config.group,
            store: config.store,
            observers: config.observers,
            registry: config.registry,
            period: config.period,
            max_pending_partials: config.max_pending_partials,

            router: Arc::new(router),
            dkg,
            dkg_receiver: Mutex::new(Some(dkg_receiver)),
            beacon_receiver: Mutex::new(Some(beacon_receiver)),
            beacon: Mutex::new(None),

            signaler: Mutex::new(Some(signaler)),
            signal,
            stopped: AtomicBool::new(false),
        })
    }

    /// Index of this node in the group.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Group this node belongs to.
    pub fn group(&self) -> &Group {
        &self.group
    }

    /// Start accepting connections from the rest of the group.
    pub async fn listen(&self) -> Result<SocketAddr, Error> {
        Ok(self.router.listen().await?)
    }

    /// Lead a DKG: pick the genesis of the beacon and start the session.
    pub async fn start_dkg(&self) -> Result<dkg::Output, Error> {
        self.run_dkg_as(true).await
    }

    /// Wait for the leader to start a DKG and take part in it.
    pub async fn run_dkg(&self) -> Result<dkg::Output, Error> {
        self.run_dkg_as(false).await
    }

    async fn run_dkg_as(&self, leader: bool) -> Result<dkg::Output, Error> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }
        let mut receiver = self
            .dkg_receiver
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::DkgAlreadyRun)?;
        let mut signal = self.signal.clone();
        let output = self
            .dkg
            .run(&self.router, &mut receiver, leader, &mut signal)
            .await?;

        // The share must be durable before the group key is
        self.store.save_share(&output.share)?;
        self.store.save_dist_public(&output.public)?;
        self.spawn_beacon(output.share.clone(), output.public.clone(), output.genesis)?;
        Ok(output)
    }

    /// Produce beacons with the share and group key already in the store.
    pub fn run_beacon(&self, genesis: u64) -> Result<(), Error> {
        let share = self.store.load_share()?.ok_or(Error::MissingShare)?;
        let public = self
            .store
            .load_dist_public()?
            .ok_or(Error::MissingDistPublic)?;
        self.spawn_beacon(share, public, genesis)
    }

    fn spawn_beacon(&self, share: Share, public: poly::Public, genesis: u64) -> Result<(), Error> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }
        let receiver = self
            .beacon_receiver
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::BeaconAlreadyRunning)?;
        let engine = beacon::Engine::new(
            beacon::Config {
                share,
                public,
                genesis,
                period: self.period,
                max_pending: self.max_pending_partials,
                registry: self.registry.clone(),
            },
            self.store.clone(),
            self.observers.clone(),
        );
        let handle = tokio::spawn(engine.run(self.router.clone(), receiver, self.signal.clone()));
        *self.beacon.lock().unwrap() = Some(handle);
        info!(index = self.index, genesis, "beacon started");
        Ok(())
    }

    /// Stop the beacon and disconnect from the group.
    ///
    /// Returns once the beacon has stopped. Calling it more than once has no effect.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(signaler) = self.signaler.lock().unwrap().take() {
            signaler.signal(0);
        }
        self.router.stop().await;

        let beacon = self.beacon.lock().unwrap().take();
        if let Some(beacon) = beacon {
            match beacon.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(?err, "beacon failed"),
                Err(err) => error!(?err, "beacon panicked"),
            }
        }
        info!(index = self.index, "node stopped");
    }
}
