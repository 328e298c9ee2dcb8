//! Distributed Key Generation (DKG) for the BLS12-381 curve.
//!
//! This module implements the dealer and player state machines of a Joint-Feldman DKG with
//! complaints and justifications ("Secure Distributed Key Generation for Discrete-Log Based
//! Cryptosystems", GJKR99). Every participant is both a dealer and a player. Networking,
//! timeouts and persistence are left to the caller.
//!
//! # Overview
//!
//! ## [Dealer] Step 0: Generate Commitment and Shares
//!
//! Generate a random polynomial of degree `t - 1`, commit to it, and evaluate it at every player.
//!
//! ## [Dealer] Step 1: Distribute Commitment and Shares
//!
//! Send the commitment and the encrypted share ([ops::encrypt_share]) to every player.
//!
//! ## [Player] Step 2: Verify Deal and Respond
//!
//! Verify the share against the commitment ([ops::verify_share]) and broadcast either an
//! approval (carrying the digest of the commitment) or a complaint. Players that receive no deal
//! before the deal phase ends complain as well.
//!
//! ## [Dealer] Step 3: Justify
//!
//! For every complaint, broadcast the complainer's share in the clear.
//!
//! ## [Player] Step 4: Qualify and Finalize
//!
//! Exclude dealers with unanswered complaints, invalid justifications or conflicting commitments.
//! If at least `t` dealers remain, sum their commitments into the group polynomial and their
//! shares into this player's share ([player::Player::finalize]).
//!
//! # Synchrony Assumption
//!
//! Qualification is computed locally. Players that observe the same responses and justifications
//! (guaranteed when every broadcast reaches every honest player before its phase ends) agree on
//! the qualified set and therefore on the group polynomial.
//!
//! # Example
//!
//! ```rust
//! use beacon_cryptography::bls12381::dkg::{dealer::Dealer, player::Player};
//! use rand::rngs::OsRng;
//!
//! let (n, t) = (3, 2);
//! let dealers: Vec<_> = (0..n).map(|i| Dealer::new(&mut OsRng, i, n, t)).collect();
//! let mut players: Vec<_> = (0..n).map(|i| Player::new(i, n, t)).collect();
//! for dealer in &dealers {
//!     for player in players.iter_mut() {
//!         let index = player.index();
//!         let share = dealer.share(index).unwrap().clone();
//!         player.deal(dealer.index(), dealer.commitment().clone(), share).unwrap();
//!     }
//! }
//! let outputs: Vec<_> = players.into_iter().map(|p| p.finalize().unwrap()).collect();
//! assert!(outputs.iter().all(|o| o.public == outputs[0].public));
//! ```

pub mod dealer;
pub mod ops;
pub mod player;

use crate::bls12381::ecies;
use thiserror::Error;

/// Errors that can occur during a DKG.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("commitment has wrong degree")]
    CommitmentWrongDegree,
    #[error("misdirected share")]
    MisdirectedShare,
    #[error("share not on commitment")]
    ShareWrongCommitment,
    #[error("malformed share")]
    MalformedShare,
    #[error("insufficient dealings: {0}/{1}")]
    InsufficientDealings(usize, usize),
    #[error("dealer is invalid")]
    DealerInvalid,
    #[error("player invalid")]
    PlayerInvalid,
    #[error("duplicate share")]
    DuplicateShare,
    #[error("duplicate response")]
    DuplicateResponse,
    #[error("duplicate complaint")]
    DuplicateComplaint,
    #[error("mismatched commitment")]
    MismatchedCommitment,
    #[error("encryption: {0}")]
    Encryption(#[from] ecies::Error),
}
