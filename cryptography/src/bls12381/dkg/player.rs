//! Participants in a DKG procedure that receive dealings from dealers
//! and eventually maintain a share of a shared secret.
//!
//! # Qualification
//!
//! A player computes the qualified set locally once all phases are over. A
//! dealer is qualified iff:
//! - its commitment is known (from a deal or a justification),
//! - this player holds a valid share from it,
//! - every complaint against it was answered by a valid justification,
//! - every approval names the digest of the commitment this player holds.
//!
//! Players that observed the same responses and justifications compute the
//! same qualified set.

use crate::bls12381::{
    dkg::{ops, Error},
    primitives::{
        group::{Element, Private, Share},
        poly,
    },
};
use beacon_utils::DIGEST_LENGTH;
use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};

/// Output of a DKG procedure.
#[derive(Clone, Debug)]
pub struct Output {
    /// The group polynomial output by the DKG procedure.
    pub public: poly::Public,

    /// The player's share of the shared secret that corresponds to
    /// the group polynomial.
    pub share: Share,

    /// Dealers whose contributions were combined, in index order.
    pub qualified: Vec<u32>,
}

/// A response broadcast by a player about a dealer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Response {
    Approval([u8; DIGEST_LENGTH]),
    Complaint,
}

/// Track deals, responses and justifications for one DKG.
pub struct Player {
    me: u32,
    n: u32,
    threshold: u32,

    commitments: BTreeMap<u32, poly::Public>,
    shares: BTreeMap<u32, Share>,
    equivocators: BTreeSet<u32>,

    responses: BTreeMap<u32, BTreeMap<u32, Response>>,
    justified: BTreeMap<u32, BTreeSet<u32>>,
}

impl Player {
    /// Create a new player at index `me` among `n` players with threshold `t`.
    pub fn new(me: u32, n: u32, threshold: u32) -> Self {
        Self {
            me,
            n,
            threshold,

            commitments: BTreeMap::new(),
            shares: BTreeMap::new(),
            equivocators: BTreeSet::new(),

            responses: BTreeMap::new(),
            justified: BTreeMap::new(),
        }
    }

    /// Index of this player.
    pub fn index(&self) -> u32 {
        self.me
    }

    /// Records `commitment` for `dealer`, flagging the dealer if it differs from one already seen.
    fn track_commitment(&mut self, dealer: u32, commitment: poly::Public) -> Result<(), Error> {
        match self.commitments.entry(dealer) {
            Entry::Occupied(existing) => {
                if existing.get() != &commitment {
                    self.equivocators.insert(dealer);
                    return Err(Error::MismatchedCommitment);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(commitment);
            }
        }
        Ok(())
    }

    /// Verify and track a deal from a dealer.
    ///
    /// A well-formed commitment is remembered even when the share is invalid, so that
    /// a later justification must match it.
    pub fn deal(&mut self, dealer: u32, commitment: poly::Public, share: Share) -> Result<(), Error> {
        if dealer >= self.n {
            return Err(Error::DealerInvalid);
        }
        if self.shares.contains_key(&dealer) {
            return Err(Error::DuplicateShare);
        }
        ops::verify_commitment(&commitment, self.threshold)?;
        let verified = ops::verify_share(&commitment, self.threshold, self.me, &share);
        self.track_commitment(dealer, commitment)?;
        verified?;
        self.shares.insert(dealer, share);
        Ok(())
    }

    /// Track the commitment of a deal whose share could not be recovered.
    pub fn commitment(&mut self, dealer: u32, commitment: poly::Public) -> Result<(), Error> {
        if dealer >= self.n {
            return Err(Error::DealerInvalid);
        }
        ops::verify_commitment(&commitment, self.threshold)?;
        self.track_commitment(dealer, commitment)
    }

    /// Whether a valid share from `dealer` is held.
    pub fn has(&self, dealer: u32) -> bool {
        self.shares.contains_key(&dealer)
    }

    /// The digest of the commitment held for `dealer`.
    pub fn digest(&self, dealer: u32) -> Option<[u8; DIGEST_LENGTH]> {
        self.commitments.get(&dealer).map(ops::commitment_digest)
    }

    /// Track a response from `player` about `dealer`.
    ///
    /// `digest` is ignored for complaints. Only the first response per (player, dealer) counts.
    pub fn response(
        &mut self,
        player: u32,
        dealer: u32,
        approved: bool,
        digest: [u8; DIGEST_LENGTH],
    ) -> Result<(), Error> {
        if player >= self.n {
            return Err(Error::PlayerInvalid);
        }
        if dealer >= self.n {
            return Err(Error::DealerInvalid);
        }
        let response = if approved {
            Response::Approval(digest)
        } else {
            Response::Complaint
        };
        match self.responses.entry(dealer).or_default().entry(player) {
            Entry::Occupied(_) => Err(Error::DuplicateResponse),
            Entry::Vacant(entry) => {
                entry.insert(response);
                Ok(())
            }
        }
    }

    /// Dealers with at least one complaint.
    pub fn complained(&self) -> Vec<u32> {
        self.responses
            .iter()
            .filter(|(_, responses)| responses.values().any(|r| *r == Response::Complaint))
            .map(|(dealer, _)| *dealer)
            .collect()
    }

    /// Verify and track a justification: a share revealed by `dealer` in response
    /// to a complaint by `share.index`.
    pub fn justification(
        &mut self,
        dealer: u32,
        commitment: poly::Public,
        share: Share,
    ) -> Result<(), Error> {
        if dealer >= self.n {
            return Err(Error::DealerInvalid);
        }
        if share.index >= self.n {
            return Err(Error::PlayerInvalid);
        }
        ops::verify_share(&commitment, self.threshold, share.index, &share)?;
        self.track_commitment(dealer, commitment)?;
        self.justified.entry(dealer).or_default().insert(share.index);

        // A revealed share for us replaces the deal we never got (or that was invalid)
        if share.index == self.me {
            self.shares.entry(dealer).or_insert(share);
        }
        Ok(())
    }

    /// Compute the qualified set of dealers.
    pub fn qualified(&self) -> Vec<u32> {
        self.commitments
            .iter()
            .filter(|(dealer, commitment)| {
                if self.equivocators.contains(dealer) || !self.shares.contains_key(dealer) {
                    return false;
                }
                let Some(responses) = self.responses.get(dealer) else {
                    return true;
                };
                let digest = ops::commitment_digest(commitment);
                let justified = self.justified.get(dealer);
                responses.iter().all(|(player, response)| match response {
                    Response::Approval(approved) => *approved == digest,
                    Response::Complaint => justified.is_some_and(|j| j.contains(player)),
                })
            })
            .map(|(dealer, _)| *dealer)
            .collect()
    }

    /// Combine the contributions of all qualified dealers into the group polynomial
    /// and this player's share.
    pub fn finalize(self) -> Result<Output, Error> {
        let qualified = self.qualified();
        let public = ops::construct_public(
            qualified.iter().filter_map(|d| self.commitments.get(d)),
            self.threshold,
        )?;
        let mut private = Private::zero();
        for dealer in &qualified {
            if let Some(share) = self.shares.get(dealer) {
                private.add(&share.private);
            }
        }
        Ok(Output {
            public,
            share: Share {
                index: self.me,
                private,
            },
            qualified,
        })
    }
}
