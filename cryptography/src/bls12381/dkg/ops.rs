//! Stateless operations useful in a DKG procedure.

use crate::bls12381::{
    dkg::Error,
    ecies,
    primitives::{
        group::{self, Share},
        poly,
    },
};
use beacon_codec::{DecodeExt, Encode};
use beacon_utils::{hash, DIGEST_LENGTH};
use rand::{CryptoRng, RngCore};

/// Generate shares and a commitment.
///
/// The secret polynomial has degree `t - 1`, so any `t` shares recover its constant term.
pub fn generate_shares<R: RngCore>(rng: &mut R, n: u32, t: u32) -> (poly::Public, Vec<Share>) {
    // Generate a secret polynomial and commit to it
    let secret = poly::new_from(t - 1, rng);
    let commitment = poly::Public::commit(secret.clone());

    // Evaluate the polynomial at each player
    let shares = (0..n)
        .map(|i| {
            let eval = secret.evaluate(i);
            Share {
                index: eval.index,
                private: eval.value,
            }
        })
        .collect::<Vec<_>>();
    (commitment, shares)
}

/// Verify that a given commitment has the degree expected for threshold `t`.
pub fn verify_commitment(commitment: &poly::Public, t: u32) -> Result<(), Error> {
    if commitment.degree() != t - 1 {
        return Err(Error::CommitmentWrongDegree);
    }
    Ok(())
}

/// Verify that a given share is valid for a specified recipient.
pub fn verify_share(
    commitment: &poly::Public,
    t: u32,
    recipient: u32,
    share: &Share,
) -> Result<(), Error> {
    verify_commitment(commitment, t)?;
    if share.index != recipient {
        return Err(Error::MisdirectedShare);
    }
    let expected = share.public();
    let given = commitment.evaluate(share.index);
    if given.value != expected {
        return Err(Error::ShareWrongCommitment);
    }
    Ok(())
}

/// Construct a new public polynomial by summing all commitments.
pub fn construct_public<'a, I>(commitments: I, required: u32) -> Result<poly::Public, Error>
where
    I: IntoIterator<Item = &'a poly::Public>,
{
    let mut count = 0usize;
    let mut public = poly::Public::zero();
    for commitment in commitments {
        public.add(commitment);
        count += 1;
    }
    if count < required as usize {
        return Err(Error::InsufficientDealings(count, required as usize));
    }
    Ok(public)
}

/// Digest of a commitment, used by players to tell each other which
/// commitment they approved.
pub fn commitment_digest(commitment: &poly::Public) -> [u8; DIGEST_LENGTH] {
    hash(&commitment.encode())
}

fn associated_data(dealer: u32, recipient: u32) -> [u8; 8] {
    let mut ad = [0u8; 8];
    ad[..4].copy_from_slice(&dealer.to_be_bytes());
    ad[4..].copy_from_slice(&recipient.to_be_bytes());
    ad
}

/// Encrypts a share so that only the owner of `recipient` can read it.
pub fn encrypt_share<R: RngCore + CryptoRng>(
    rng: &mut R,
    dealer: u32,
    recipient: &group::Public,
    share: &Share,
) -> Result<(group::Public, Vec<u8>), Error> {
    let plaintext = zeroize::Zeroizing::new(share.encode().to_vec());
    let sealed = ecies::encrypt(rng, recipient, &associated_data(dealer, share.index), &plaintext)?;
    Ok(sealed)
}

/// Decrypts a share sent by `dealer` to `recipient`.
pub fn decrypt_share(
    private: &group::Private,
    dealer: u32,
    recipient: u32,
    ephemeral: &group::Public,
    ciphertext: &[u8],
) -> Result<Share, Error> {
    let plaintext = ecies::decrypt(
        private,
        ephemeral,
        &associated_data(dealer, recipient),
        ciphertext,
    )?;
    Share::decode(plaintext.as_slice()).map_err(|_| Error::MalformedShare)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bls12381::primitives::ops::keypair;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn shares_verify_against_commitment() {
        let mut rng = StdRng::seed_from_u64(0);
        let (commitment, shares) = generate_shares(&mut rng, 5, 3);
        assert_eq!(commitment.required(), 3);
        for share in &shares {
            verify_share(&commitment, 3, share.index, share).unwrap();
        }
        assert!(matches!(
            verify_share(&commitment, 3, 1, &shares[0]),
            Err(Error::MisdirectedShare)
        ));
        assert!(matches!(
            verify_share(&commitment, 4, 0, &shares[0]),
            Err(Error::CommitmentWrongDegree)
        ));

        let mut forged = shares[2].clone();
        forged.index = 3;
        assert!(matches!(
            verify_share(&commitment, 3, 3, &forged),
            Err(Error::ShareWrongCommitment)
        ));
    }

    #[test]
    fn construct_public_requires_enough_commitments() {
        let mut rng = StdRng::seed_from_u64(1);
        let (a, _) = generate_shares(&mut rng, 3, 2);
        let (b, _) = generate_shares(&mut rng, 3, 2);
        assert!(matches!(
            construct_public([&a], 2),
            Err(Error::InsufficientDealings(1, 2))
        ));
        let public = construct_public([&a, &b], 2).unwrap();
        let mut expected = a.clone();
        expected.add(&b);
        assert_eq!(public, expected);
    }

    #[test]
    fn share_encryption() {
        let mut rng = StdRng::seed_from_u64(2);
        let (private, public) = keypair(&mut rng);
        let (_, shares) = generate_shares(&mut rng, 3, 2);
        let (ephemeral, ciphertext) = encrypt_share(&mut rng, 0, &public, &shares[1]).unwrap();
        let share = decrypt_share(&private, 0, 1, &ephemeral, &ciphertext).unwrap();
        assert_eq!(share, shares[1]);

        // Associated data binds the dealer and recipient
        assert!(decrypt_share(&private, 2, 1, &ephemeral, &ciphertext).is_err());
        assert!(decrypt_share(&private, 0, 2, &ephemeral, &ciphertext).is_err());
    }
}
