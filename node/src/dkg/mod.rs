//! Run a Joint-Feldman DKG with the rest of the group.
//!
//! # Phases
//!
//! ```text
//! Idle -> DealGeneration -> DealCollection -> ResponseCollection -> Certification -> Finalized
//!                                                                               \-> Aborted
//! ```
//!
//! The leader starts a session by broadcasting [crate::wire::Payload::Start] with the
//! genesis of the beacon that follows. A follower starts when it receives the start
//! message or the first deal of a session, whichever comes first.
//!
//! After sending a deal to every other node, a node collects deals for `phase_timeout`
//! and broadcasts a response for each (an approval carrying the digest of the commitment
//! it holds, or a complaint). When the deal phase ends, it complains about every dealer
//! it heard nothing from. During the following `phase_timeout`, dealers answer complaints
//! by broadcasting the complainer's share in the clear. Each node then computes the
//! qualified set locally and finalizes (or aborts if fewer than `threshold` dealers
//! qualified).

mod engine;

pub use engine::Engine;

use crate::key::{Group, Pair};
use beacon_cryptography::bls12381::{
    dkg,
    primitives::{group::Share, poly},
};
use prometheus_client::registry::Registry;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;

/// Errors that end a DKG without output.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no start message received")]
    StartTimeout,
    #[error("aborted: {0}")]
    Aborted(#[from] dkg::Error),
    #[error("network closed")]
    Closed,
    #[error("shutdown")]
    Shutdown,
    #[error("network: {0}")]
    Network(#[from] beacon_p2p::Error),
}

/// Configuration for the DKG [Engine].
#[derive(Clone)]
pub struct Config {
    /// This node's identity (its key decrypts the deals it receives).
    pub identity: Pair,

    /// All participants.
    pub group: Group,

    /// Duration of the deal and response phases.
    pub phase_timeout: Duration,

    /// Time a follower waits for a session to start.
    pub start_timeout: Duration,

    /// Time between the leader starting a session and the first beacon round.
    ///
    /// Must exceed the duration of the DKG (two phases).
    pub genesis_delay: Duration,

    /// Registry for prometheus metrics.
    pub registry: Arc<Mutex<Registry>>,
}

/// Output of a successful DKG.
#[derive(Clone, Debug)]
pub struct Output {
    /// Start of the first beacon round, in milliseconds since the unix epoch.
    pub genesis: u64,

    /// The group polynomial.
    pub public: poly::Public,

    /// This node's share of the group key.
    pub share: Share,

    /// Dealers whose contributions were combined.
    pub qualified: Vec<u32>,
}
