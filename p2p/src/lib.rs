//! Communicate with authenticated peers over multiplexed channels.
//!
//! # Status
//!
//! `beacon-p2p` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use bytes::Bytes;

pub mod authenticated;
pub use authenticated::{Config, Error, Peer, Router};

/// Logical stream multiplexed over a connection to a peer.
pub type Channel = u32;

/// A message received from a peer: the sender's index and the payload.
pub type Message = (u32, Bytes);

/// Receiving end of a registered [Channel].
pub type Receiver = futures::channel::mpsc::Receiver<Message>;
