//! Dealers in a DKG procedure that distribute shares of a fresh secret.

use crate::bls12381::{
    dkg::{ops, Error},
    primitives::{group::Share, poly},
};
use rand::RngCore;
use std::collections::BTreeSet;

/// Generate a secret polynomial, deal it, and answer complaints about the deal.
pub struct Dealer {
    me: u32,
    commitment: poly::Public,
    shares: Vec<Share>,

    complaints: BTreeSet<u32>,
}

impl Dealer {
    /// Create a new dealer for `n` players with threshold `t`.
    pub fn new<R: RngCore>(rng: &mut R, me: u32, n: u32, t: u32) -> Self {
        let (commitment, shares) = ops::generate_shares(rng, n, t);
        Self {
            me,
            commitment,
            shares,
            complaints: BTreeSet::new(),
        }
    }

    /// Index of this dealer.
    pub fn index(&self) -> u32 {
        self.me
    }

    /// The commitment to the dealt polynomial.
    pub fn commitment(&self) -> &poly::Public {
        &self.commitment
    }

    /// The share dealt to `player`.
    pub fn share(&self, player: u32) -> Option<&Share> {
        self.shares.get(player as usize)
    }

    /// Track a complaint from `player` and return the share to reveal publicly.
    ///
    /// Each player may only complain once.
    pub fn complaint(&mut self, player: u32) -> Result<Share, Error> {
        let share = self
            .shares
            .get(player as usize)
            .cloned()
            .ok_or(Error::PlayerInvalid)?;
        if !self.complaints.insert(player) {
            return Err(Error::DuplicateComplaint);
        }
        Ok(share)
    }

    /// Number of complaints answered.
    pub fn complaints(&self) -> usize {
        self.complaints.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_complaint() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut dealer = Dealer::new(&mut rng, 0, 4, 3);
        assert_eq!(dealer.commitment().required(), 3);

        let share = dealer.complaint(2).unwrap();
        assert_eq!(share.index, 2);
        ops::verify_share(dealer.commitment(), 3, 2, &share).unwrap();

        assert!(matches!(dealer.complaint(2), Err(Error::DuplicateComplaint)));
        assert!(matches!(dealer.complaint(4), Err(Error::PlayerInvalid)));
        assert_eq!(dealer.complaints(), 1);
    }
}
