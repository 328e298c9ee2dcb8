//! Persist keys, DKG output and beacons.

use crate::{
    beacon::BeaconSignature,
    key::{Group, Pair},
};
use beacon_cryptography::bls12381::primitives::{group::Share, poly};
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};
use thiserror::Error;

/// Errors that can occur when interacting with a [Store].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("conflicting beacon for round {0}")]
    Conflict(u64),
    #[error("store poisoned")]
    Poisoned,
    #[error("backend: {0}")]
    Backend(String),
}

/// Durable state of a node.
///
/// Implementations must serialize access: each call is atomic with respect to all others.
pub trait Store: Send + Sync {
    fn save_key(&self, pair: &Pair) -> Result<(), Error>;
    fn load_key(&self) -> Result<Option<Pair>, Error>;

    fn load_group(&self) -> Result<Option<Group>, Error>;

    fn save_share(&self, share: &Share) -> Result<(), Error>;
    fn load_share(&self) -> Result<Option<Share>, Error>;

    fn save_dist_public(&self, public: &poly::Public) -> Result<(), Error>;
    fn load_dist_public(&self) -> Result<Option<poly::Public>, Error>;

    /// Persist `beacon`.
    ///
    /// Returns `Ok(false)` if the same beacon was already stored for its round and
    /// [Error::Conflict] if a different one was.
    fn save_beacon(&self, beacon: &BeaconSignature) -> Result<bool, Error>;

    /// The beacon of `round`, if one was produced.
    fn load_beacon(&self, round: u64) -> Result<Option<BeaconSignature>, Error>;

    fn beacon_exists(&self, round: u64) -> Result<bool, Error> {
        Ok(self.load_beacon(round)?.is_some())
    }
}

/// Notified after every beacon is persisted.
pub trait Observer: Send + Sync {
    fn on_beacon(&self, beacon: &BeaconSignature);
}

#[derive(Default)]
struct State {
    key: Option<Pair>,
    group: Option<Group>,
    share: Option<Share>,
    dist_public: Option<poly::Public>,
    beacons: BTreeMap<u64, BeaconSignature>,
}

/// A [Store] held in memory.
#[derive(Default)]
pub struct Memory {
    state: Mutex<State>,
}

impl Memory {
    /// Create an empty store that serves `group`.
    pub fn new(group: Group) -> Self {
        Self {
            state: Mutex::new(State {
                group: Some(group),
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, Error> {
        self.state.lock().map_err(|_| Error::Poisoned)
    }

    /// All stored beacons, in round order.
    pub fn beacons(&self) -> Result<Vec<BeaconSignature>, Error> {
        Ok(self.state()?.beacons.values().cloned().collect())
    }

    /// The beacon of the highest round stored.
    pub fn latest(&self) -> Result<Option<BeaconSignature>, Error> {
        Ok(self.state()?.beacons.values().next_back().cloned())
    }
}

impl Store for Memory {
    fn save_key(&self, pair: &Pair) -> Result<(), Error> {
        self.state()?.key = Some(pair.clone());
        Ok(())
    }

    fn load_key(&self) -> Result<Option<Pair>, Error> {
        Ok(self.state()?.key.clone())
    }

    fn load_group(&self) -> Result<Option<Group>, Error> {
        Ok(self.state()?.group.clone())
    }

    fn save_share(&self, share: &Share) -> Result<(), Error> {
        self.state()?.share = Some(share.clone());
        Ok(())
    }

    fn load_share(&self) -> Result<Option<Share>, Error> {
        Ok(self.state()?.share.clone())
    }

    fn save_dist_public(&self, public: &poly::Public) -> Result<(), Error> {
        self.state()?.dist_public = Some(public.clone());
        Ok(())
    }

    fn load_dist_public(&self) -> Result<Option<poly::Public>, Error> {
        Ok(self.state()?.dist_public.clone())
    }

    fn save_beacon(&self, beacon: &BeaconSignature) -> Result<bool, Error> {
        let mut state = self.state()?;
        if let Some(existing) = state.beacons.get(&beacon.round) {
            if existing != beacon {
                return Err(Error::Conflict(beacon.round));
            }
            return Ok(false);
        }
        state.beacons.insert(beacon.round, beacon.clone());
        Ok(true)
    }

    fn load_beacon(&self, round: u64) -> Result<Option<BeaconSignature>, Error> {
        Ok(self.state()?.beacons.get(&round).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Identity;
    use beacon_cryptography::bls12381::{
        dkg::ops::generate_shares,
        primitives::{group, ops::sign_message},
    };
    use rand::{rngs::StdRng, SeedableRng};

    fn signature(seed: u64) -> group::Signature {
        let mut rng = StdRng::seed_from_u64(seed);
        let pair = Pair::new(&mut rng, "127.0.0.1:0");
        sign_message(pair.private(), None, b"beacon")
    }

    #[test]
    fn test_save_beacon_idempotent() {
        let store = Memory::default();
        let beacon = BeaconSignature {
            round: 3,
            previous: None,
            signature: signature(0),
        };
        assert!(!store.beacon_exists(3).unwrap());
        assert!(store.save_beacon(&beacon).unwrap());
        assert!(!store.save_beacon(&beacon).unwrap());
        assert_eq!(store.beacons().unwrap(), vec![beacon.clone()]);
        assert!(store.beacon_exists(3).unwrap());
        assert_eq!(store.load_beacon(3).unwrap(), Some(beacon.clone()));
        assert_eq!(store.load_beacon(4).unwrap(), None);

        let conflicting = BeaconSignature {
            signature: signature(1),
            ..beacon.clone()
        };
        assert_eq!(store.save_beacon(&conflicting), Err(Error::Conflict(3)));
        assert_eq!(store.load_beacon(3).unwrap(), Some(beacon));
    }

    #[test]
    fn test_latest() {
        let store = Memory::default();
        assert_eq!(store.latest().unwrap(), None);
        for round in [2, 7, 5] {
            let beacon = BeaconSignature {
                round,
                previous: None,
                signature: signature(round),
            };
            store.save_beacon(&beacon).unwrap();
        }
        assert_eq!(store.latest().unwrap().unwrap().round, 7);
        let rounds: Vec<_> = store.beacons().unwrap().iter().map(|b| b.round).collect();
        assert_eq!(rounds, vec![2, 5, 7]);
    }

    #[test]
    fn test_dkg_output() {
        let mut rng = StdRng::seed_from_u64(3);
        let pair = Pair::new(&mut rng, "127.0.0.1:9000");
        let group = Group::new(vec![Identity::clone(pair.public())], 1).unwrap();
        let store = Memory::new(group.clone());
        assert_eq!(store.load_group().unwrap(), Some(group));
        assert!(store.load_key().unwrap().is_none());
        store.save_key(&pair).unwrap();
        assert_eq!(store.load_key().unwrap().unwrap().public(), pair.public());

        let (public, shares) = generate_shares(&mut rng, 1, 1);
        assert!(store.load_share().unwrap().is_none());
        store.save_share(&shares[0]).unwrap();
        store.save_dist_public(&public).unwrap();
        assert_eq!(store.load_share().unwrap(), Some(shares[0].clone()));
        assert_eq!(store.load_dist_public().unwrap(), Some(public));
    }
}
