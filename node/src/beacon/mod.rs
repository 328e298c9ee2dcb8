//! Produce one threshold signature per round, chained to the previous round.
//!
//! # Rounds
//!
//! Round `r >= 1` starts at `genesis + (r - 1) * period` and lasts one period. At the
//! start of a round, every node signs the round message with its share and broadcasts
//! the resulting [crate::wire::Partial]. Once `threshold` valid partials over the same
//! message are held, they are combined into the [BeaconSignature] of the round, which
//! is verified, persisted, and handed to every [crate::store::Observer].
//!
//! A round without enough partials by the time its period elapses is missed. Missed
//! rounds are never retried.
//!
//! # Chaining
//!
//! The message of round `r` is `SHA-256(r || previous)`, where `r` is a big-endian `u64`
//! and `previous` is the compressed signature of round `r - 1`. If that signature is not
//! known (the round was missed), the message is `SHA-256(r)`. Each partial names the
//! `previous` it was computed over, and partials are only combined with partials over
//! the same message.

mod engine;

pub use engine::Engine;

use beacon_codec::{Encode, EncodeSize, Error as CodecError, Read, ReadExt, Write};
use beacon_cryptography::bls12381::primitives::{
    group::{self, Share},
    ops::verify_message,
    poly,
};
use bytes::{Buf, BufMut};
use prometheus_client::registry::Registry;
use sha2::{Digest, Sha256};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;

/// Namespace of all round signatures.
pub const NAMESPACE: &[u8] = b"_BEACON_ROUND";

/// Errors that stop the beacon engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("store: {0}")]
    Store(#[from] crate::store::Error),
}

/// Compute the message signed in `round`.
pub fn message(round: u64, previous: Option<&group::Signature>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(round.to_be_bytes());
    if let Some(previous) = previous {
        hasher.update(previous.encode());
    }
    hasher.finalize().into()
}

/// The threshold signature produced for a round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeaconSignature {
    pub round: u64,
    pub previous: Option<group::Signature>,
    pub signature: group::Signature,
}

impl BeaconSignature {
    /// The message this beacon signs.
    pub fn message(&self) -> [u8; 32] {
        message(self.round, self.previous.as_ref())
    }

    /// Verify the beacon against the group polynomial.
    pub fn verify(&self, public: &poly::Public) -> bool {
        verify_message(
            poly::public(public),
            Some(NAMESPACE),
            &self.message(),
            &self.signature,
        )
        .is_ok()
    }

    /// The random value of the round.
    pub fn randomness(&self) -> [u8; 32] {
        beacon_utils::hash(&self.signature.encode())
    }
}

impl Write for BeaconSignature {
    fn write(&self, buf: &mut impl BufMut) {
        self.round.write(buf);
        self.previous.write(buf);
        self.signature.write(buf);
    }
}

impl Read for BeaconSignature {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            round: u64::read(buf)?,
            previous: Option::<group::Signature>::read(buf)?,
            signature: group::Signature::read(buf)?,
        })
    }
}

impl EncodeSize for BeaconSignature {
    fn encode_size(&self) -> usize {
        self.round.encode_size() + self.previous.encode_size() + self.signature.encode_size()
    }
}

/// Configuration for the beacon [Engine].
pub struct Config {
    /// This node's share of the group key.
    pub share: Share,

    /// The group polynomial.
    pub public: poly::Public,

    /// Start of round 1, in milliseconds since the unix epoch.
    pub genesis: u64,

    /// Duration of each round.
    pub period: Duration,

    /// Maximum number of partials for the next round held before the current round ends.
    pub max_pending: usize,

    /// Registry for prometheus metrics.
    pub registry: Arc<Mutex<Registry>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_codec::{DecodeExt, FixedSize};
    use beacon_cryptography::bls12381::{
        dkg::ops::generate_shares,
        primitives::ops::{partial_sign_message, threshold_signature_recover},
    };
    use rand::{rngs::StdRng, SeedableRng};

    fn beacon(
        shares: &[Share],
        threshold: u32,
        round: u64,
        previous: Option<group::Signature>,
    ) -> BeaconSignature {
        let message = message(round, previous.as_ref());
        let partials: Vec<_> = shares
            .iter()
            .take(threshold as usize)
            .map(|share| partial_sign_message(share, Some(NAMESPACE), &message))
            .collect();
        let signature = threshold_signature_recover(threshold, &partials).unwrap();
        BeaconSignature {
            round,
            previous,
            signature,
        }
    }

    #[test]
    fn test_message_chaining() {
        let mut rng = StdRng::seed_from_u64(0);
        let (_, shares) = generate_shares(&mut rng, 3, 2);
        let previous = partial_sign_message(&shares[0], None, b"previous").value;

        assert_ne!(message(1, None), message(2, None));
        assert_ne!(message(2, None), message(2, Some(&previous)));
        assert_eq!(message(2, Some(&previous)), message(2, Some(&previous)));
    }

    #[test]
    fn test_verify() {
        let mut rng = StdRng::seed_from_u64(1);
        let (public, shares) = generate_shares(&mut rng, 4, 3);
        let first = beacon(&shares, 3, 1, None);
        assert!(first.verify(&public));
        let second = beacon(&shares, 3, 2, Some(first.signature));
        assert!(second.verify(&public));
        assert_ne!(first.randomness(), second.randomness());

        // Any change to the signed fields invalidates the beacon
        let mut moved = second.clone();
        moved.round = 3;
        assert!(!moved.verify(&public));
        let mut unchained = second.clone();
        unchained.previous = None;
        assert!(!unchained.verify(&public));
        let mut swapped = second;
        swapped.signature = first.signature;
        assert!(!swapped.verify(&public));

        // Too few partials recover a different value
        assert!(threshold_signature_recover(3, &Vec::<poly::PartialSignature>::new()).is_err());
        let short = beacon(&shares, 2, 1, None);
        assert!(!short.verify(&public));

        // A different group cannot verify it
        let (other, _) = generate_shares(&mut rng, 4, 3);
        assert!(!first.verify(&other));
    }

    #[test]
    fn test_mutated_bytes() {
        let mut rng = StdRng::seed_from_u64(2);
        let (public, shares) = generate_shares(&mut rng, 4, 3);
        let beacon = beacon(&shares, 3, 5, None);
        let encoded = beacon.encode();
        assert_eq!(BeaconSignature::decode(encoded.clone()).unwrap(), beacon);

        // Flipping any bit of the signature either fails decoding or verification
        let offset = u64::SIZE + 1;
        for i in offset..encoded.len() {
            let mut mutated = encoded.to_vec();
            mutated[i] ^= 0x01;
            if let Ok(decoded) = BeaconSignature::decode(mutated.as_slice()) {
                assert!(!decoded.verify(&public));
            }
        }
    }
}
