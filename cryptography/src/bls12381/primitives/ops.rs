//! Digital signatures over the BLS12-381 curve using G1 as the Public Key (48 bytes)
//! and G2 as the Signature (96 bytes).
//!
//! Messages are hashed to G2 with the `BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_`
//! domain separation tag. When a namespace is provided, the signed payload is
//! `union_unique(namespace, message)`.

use super::{
    group::{self, equal, Element, Point, Scalar, Share},
    poly::{self, Eval, PartialSignature},
    Error,
};
use beacon_utils::union_unique;
use rand::RngCore;
use std::borrow::Cow;

/// Computes the public key from the private key.
pub fn compute_public(private: &Scalar) -> group::Public {
    let mut public = group::Public::one();
    public.mul(private);
    public
}

/// Returns a new keypair derived from the provided randomness.
pub fn keypair<R: RngCore>(rng: &mut R) -> (group::Private, group::Public) {
    let private = group::Private::rand(rng);
    let public = compute_public(&private);
    (private, public)
}

fn payload<'a>(namespace: Option<&[u8]>, message: &'a [u8]) -> Cow<'a, [u8]> {
    match namespace {
        Some(namespace) => Cow::Owned(union_unique(namespace, message)),
        None => Cow::Borrowed(message),
    }
}

/// Hashes the provided message (and optional namespace) to G2.
pub fn hash_message(namespace: Option<&[u8]>, message: &[u8]) -> group::Signature {
    let mut hm = group::Signature::zero();
    hm.map(&payload(namespace, message));
    hm
}

/// Signs the provided message with the private key.
///
/// # Determinism
///
/// Signatures produced by this function are deterministic and are safe
/// to use in a consensus-critical context.
pub fn sign_message(
    private: &group::Private,
    namespace: Option<&[u8]>,
    message: &[u8],
) -> group::Signature {
    let mut hm = hash_message(namespace, message);
    hm.mul(private);
    hm
}

/// Verifies the signature with the provided public key.
///
/// # Warning
///
/// This function assumes a group check was already performed on
/// `public` and `signature`.
pub fn verify_message(
    public: &group::Public,
    namespace: Option<&[u8]>,
    message: &[u8],
    signature: &group::Signature,
) -> Result<(), Error> {
    let hm = hash_message(namespace, message);
    if !equal(public, signature, &hm) {
        return Err(Error::InvalidSignature);
    }
    Ok(())
}

/// Signs the provided message with the key share.
pub fn partial_sign_message(
    private: &Share,
    namespace: Option<&[u8]>,
    message: &[u8],
) -> PartialSignature {
    let sig = sign_message(&private.private, namespace, message);
    Eval {
        value: sig,
        index: private.index,
    }
}

/// Verifies the partial signature against the public polynomial.
///
/// # Warning
///
/// This function assumes a group check was already performed on `signature`.
pub fn partial_verify_message(
    public: &poly::Public,
    namespace: Option<&[u8]>,
    message: &[u8],
    partial: &PartialSignature,
) -> Result<(), Error> {
    let public = public.evaluate(partial.index);
    verify_message(&public.value, namespace, message, &partial.value)
}

/// Recovers a signature from at least `threshold` partial signatures.
///
/// # Determinism
///
/// Signatures recovered by this function are deterministic and are safe
/// to use in a consensus-critical context.
///
/// # Warning
///
/// This function assumes that each partial signature is unique and valid.
pub fn threshold_signature_recover<'a, I>(
    threshold: u32,
    partials: I,
) -> Result<group::Signature, Error>
where
    I: IntoIterator<Item = &'a PartialSignature>,
{
    poly::Signature::recover(threshold, partials)
}
