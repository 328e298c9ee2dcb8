//! Identities of nodes and the group they form.

use beacon_codec::Encode;
use beacon_cryptography::bls12381::primitives::{group, ops};
use beacon_p2p::Peer;
use rand::{CryptoRng, RngCore};
use std::{cmp::Ordering, collections::BTreeMap, net::SocketAddr};
use thiserror::Error;

/// Errors that can occur when building a [Group].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("group is empty")]
    EmptyGroup,
    #[error("invalid threshold: {0} of {1}")]
    InvalidThreshold(u32, u32),
    #[error("duplicate key at index {0}")]
    DuplicateKey(u32),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// The public identity of a node: where to reach it and the key it signs with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub address: String,
    pub key: group::Public,
}

/// A node's [Identity] together with its private key.
#[derive(Clone, Debug)]
pub struct Pair {
    identity: Identity,
    private: group::Private,
}

impl Pair {
    /// Generate a fresh keypair for a node reachable at `address`.
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R, address: impl Into<String>) -> Self {
        let (private, key) = ops::keypair(rng);
        Self {
            identity: Identity {
                address: address.into(),
                key,
            },
            private,
        }
    }

    /// Restore a keypair from its private key.
    pub fn from_private(private: group::Private, address: impl Into<String>) -> Self {
        Self {
            identity: Identity {
                address: address.into(),
                key: ops::compute_public(&private),
            },
            private,
        }
    }

    pub fn public(&self) -> &Identity {
        &self.identity
    }

    pub fn private(&self) -> &group::Private {
        &self.private
    }
}

/// An [Identity] at a fixed position in a [Group].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedIdentity {
    pub index: u32,
    pub identity: Identity,
}

impl Ord for IndexedIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index
            .cmp(&other.index)
            .then_with(|| self.identity.address.cmp(&other.identity.address))
            .then_with(|| {
                self.identity
                    .key
                    .encode()
                    .cmp(&other.identity.key.encode())
            })
    }
}

impl PartialOrd for IndexedIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Threshold used when none is configured: a strict majority plus one, capped at `n`.
pub fn default_threshold(n: u32) -> u32 {
    (n.div_ceil(2) + 1).min(n)
}

/// The fixed set of nodes taking part in a DKG and the beacon that follows it.
///
/// Indices are assigned by position when the group is built and never change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    threshold: u32,
    nodes: Vec<IndexedIdentity>,
}

impl Group {
    /// Create a group from `identities` (in index order) with the given threshold.
    pub fn new(identities: Vec<Identity>, threshold: u32) -> Result<Self, Error> {
        if identities.is_empty() {
            return Err(Error::EmptyGroup);
        }
        let n = identities.len() as u32;
        if threshold == 0 || threshold > n {
            return Err(Error::InvalidThreshold(threshold, n));
        }
        let mut nodes: Vec<IndexedIdentity> = Vec::with_capacity(identities.len());
        for (index, identity) in identities.into_iter().enumerate() {
            let index = index as u32;
            if nodes.iter().any(|node| node.identity.key == identity.key) {
                return Err(Error::DuplicateKey(index));
            }
            nodes.push(IndexedIdentity { index, identity });
        }
        Ok(Self { threshold, nodes })
    }

    /// Create a group using [default_threshold].
    pub fn with_default_threshold(identities: Vec<Identity>) -> Result<Self, Error> {
        let threshold = default_threshold(identities.len() as u32);
        Self::new(identities, threshold)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn len(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all nodes in index order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexedIdentity> {
        self.nodes.iter()
    }

    /// The identity at `index`.
    pub fn public(&self, index: u32) -> Option<&Identity> {
        self.nodes.get(index as usize).map(|node| &node.identity)
    }

    /// The keys of all nodes, in index order.
    pub fn points(&self) -> Vec<group::Public> {
        self.nodes.iter().map(|node| node.identity.key).collect()
    }

    /// The index of the node holding `key`.
    pub fn index_of(&self, key: &group::Public) -> Option<u32> {
        self.nodes
            .iter()
            .find(|node| &node.identity.key == key)
            .map(|node| node.index)
    }

    /// The peer table used to route messages to every node.
    pub fn peers(&self) -> Result<BTreeMap<u32, Peer>, Error> {
        self.nodes
            .iter()
            .map(|node| {
                let address: SocketAddr = node
                    .identity
                    .address
                    .parse()
                    .map_err(|_| Error::InvalidAddress(node.identity.address.clone()))?;
                let peer = Peer {
                    address,
                    public: node.identity.key,
                };
                Ok((node.index, peer))
            })
            .collect()
    }
}
