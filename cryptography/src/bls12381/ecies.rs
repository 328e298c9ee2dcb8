//! Encrypt data to a BLS12-381 public key (G1).
//!
//! The sender samples an ephemeral scalar `r` and publishes `R = g1 * r`. Both
//! sides derive `key = SHA-256(NAMESPACE || R || pk * r)` and seal the data with
//! ChaCha20-Poly1305. A key is never reused, so the nonce is fixed at zero.
//! Associated data binds the ciphertext to its context (e.g. dealer and recipient).

use crate::bls12381::primitives::{
    group::{Element, Private, Public},
    ops::compute_public,
};
use beacon_codec::Encode;
use chacha20poly1305::{
    aead::{Aead, Payload},
    ChaCha20Poly1305, KeyInit, Nonce,
};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// Domain separator for derived keys.
const NAMESPACE: &[u8] = b"_BEACON_DKG_DEAL";

/// Bytes added to a plaintext by [encrypt].
pub const TAG_LENGTH: usize = 16;

/// Errors that can occur when sealing or opening data.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
}

fn cipher(ephemeral: &Public, shared: &Public) -> ChaCha20Poly1305 {
    let mut hasher = Sha256::new();
    hasher.update(NAMESPACE);
    hasher.update(ephemeral.encode());
    hasher.update(shared.encode());
    let mut key: [u8; 32] = hasher.finalize().into();
    let cipher = ChaCha20Poly1305::new(&key.into());
    key.zeroize();
    cipher
}

/// Encrypts `plaintext` to `recipient`, returning the ephemeral public key and ciphertext.
pub fn encrypt<R: RngCore + CryptoRng>(
    rng: &mut R,
    recipient: &Public,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Public, Vec<u8>), Error> {
    let mut r = Private::rand(rng);
    let ephemeral = compute_public(&r);
    let mut shared = *recipient;
    shared.mul(&r);
    r.zeroize();

    let ciphertext = cipher(&ephemeral, &shared)
        .encrypt(
            &Nonce::default(),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::EncryptionFailed)?;
    Ok((ephemeral, ciphertext))
}

/// Decrypts a ciphertext produced by [encrypt] with the recipient's private key.
pub fn decrypt(
    private: &Private,
    ephemeral: &Public,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut shared = *ephemeral;
    shared.mul(private);
    cipher(ephemeral, &shared)
        .decrypt(
            &Nonce::default(),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| Error::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bls12381::primitives::ops::keypair;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_seal_open() {
        let mut rng = StdRng::seed_from_u64(0);
        let (private, public) = keypair(&mut rng);
        let (ephemeral, ciphertext) = encrypt(&mut rng, &public, b"ad", b"secret share").unwrap();
        assert_eq!(ciphertext.len(), b"secret share".len() + TAG_LENGTH);
        let plaintext = decrypt(&private, &ephemeral, b"ad", &ciphertext).unwrap();
        assert_eq!(plaintext.as_slice(), b"secret share");
    }

    #[test]
    fn test_wrong_recipient() {
        let mut rng = StdRng::seed_from_u64(1);
        let (_, public) = keypair(&mut rng);
        let (other, _) = keypair(&mut rng);
        let (ephemeral, ciphertext) = encrypt(&mut rng, &public, b"ad", b"secret").unwrap();
        assert!(matches!(
            decrypt(&other, &ephemeral, b"ad", &ciphertext),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_associated_data() {
        let mut rng = StdRng::seed_from_u64(2);
        let (private, public) = keypair(&mut rng);
        let (ephemeral, mut ciphertext) = encrypt(&mut rng, &public, b"ad", b"secret").unwrap();
        assert!(decrypt(&private, &ephemeral, b"da", &ciphertext).is_err());
        ciphertext[0] ^= 1;
        assert!(decrypt(&private, &ephemeral, b"ad", &ciphertext).is_err());
    }
}
