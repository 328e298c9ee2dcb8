//! Messages exchanged between nodes.
//!
//! The sender of every message is attested by the authenticated connection it
//! arrives on, so it is not repeated unless a verification step refers to
//! another participant.

use beacon_codec::{
    Encode, EncodeSize, Error, FixedSize, RangeCfg, Read, ReadExt, Write,
};
use beacon_cryptography::bls12381::{
    ecies::TAG_LENGTH,
    primitives::{group, poly},
};
use beacon_p2p::Channel;
use beacon_utils::DIGEST_LENGTH;
use bytes::{Buf, BufMut, Bytes};

/// Channel carrying [Dkg] messages.
pub const DKG_CHANNEL: Channel = 0;

/// Channel carrying [Partial] messages.
pub const BEACON_CHANNEL: Channel = 1;

/// Size of an encrypted [group::Share].
pub const CIPHERTEXT_LENGTH: usize = group::Share::SIZE + TAG_LENGTH;

/// A message sent during a DKG.
///
/// `genesis` (milliseconds since the unix epoch at which the first beacon round
/// starts) is chosen by the leader and identifies the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dkg {
    pub genesis: u64,
    pub payload: Payload,
}

impl Dkg {
    pub fn new(genesis: u64, payload: Payload) -> Self {
        Self { genesis, payload }
    }

    /// Encode into a buffer ready to send.
    pub fn serialize(&self) -> Bytes {
        self.encode().freeze()
    }
}

impl Write for Dkg {
    fn write(&self, buf: &mut impl BufMut) {
        self.genesis.write(buf);
        self.payload.write(buf);
    }
}

impl Read for Dkg {
    /// The threshold of the group.
    type Cfg = u32;

    fn read_cfg(buf: &mut impl Buf, threshold: &u32) -> Result<Self, Error> {
        let genesis = u64::read(buf)?;
        let payload = Payload::read_cfg(buf, threshold)?;
        Ok(Self { genesis, payload })
    }
}

impl EncodeSize for Dkg {
    fn encode_size(&self) -> usize {
        self.genesis.encode_size() + self.payload.encode_size()
    }
}

/// The contents of a [Dkg] message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Sent by the leader to begin a session.
    Start,

    /// Sent by a dealer to each player.
    Deal {
        /// Commitment to the dealer's secret polynomial.
        commitment: poly::Public,
        /// Ephemeral key used to encrypt the share.
        ephemeral: group::Public,
        /// The recipient's share, encrypted to its identity key.
        ciphertext: Bytes,
    },

    /// Broadcast by a player about a dealer.
    Response {
        dealer: u32,
        /// Whether a valid share was received. A `false` response is a complaint.
        approved: bool,
        /// Digest of the commitment held for the dealer (zero if none).
        digest: [u8; DIGEST_LENGTH],
    },

    /// Broadcast by a dealer to answer a complaint with the complainer's share.
    Justification {
        dealer: u32,
        commitment: poly::Public,
        share: group::Share,
    },
}

impl Write for Payload {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Payload::Start => {
                buf.put_u8(0);
            }
            Payload::Deal {
                commitment,
                ephemeral,
                ciphertext,
            } => {
                buf.put_u8(1);
                commitment.write(buf);
                ephemeral.write(buf);
                ciphertext.write(buf);
            }
            Payload::Response {
                dealer,
                approved,
                digest,
            } => {
                buf.put_u8(2);
                dealer.write(buf);
                approved.write(buf);
                digest.write(buf);
            }
            Payload::Justification {
                dealer,
                commitment,
                share,
            } => {
                buf.put_u8(3);
                dealer.write(buf);
                commitment.write(buf);
                share.write(buf);
            }
        }
    }
}

impl Read for Payload {
    type Cfg = u32;

    fn read_cfg(buf: &mut impl Buf, threshold: &u32) -> Result<Self, Error> {
        let tag = u8::read(buf)?;
        let coefficients = *threshold as usize;
        let result = match tag {
            0 => Payload::Start,
            1 => {
                let commitment = poly::Public::read_cfg(buf, &coefficients)?;
                let ephemeral = group::Public::read(buf)?;
                let range: RangeCfg = CIPHERTEXT_LENGTH..=CIPHERTEXT_LENGTH;
                let ciphertext = Bytes::read_cfg(buf, &range)?;
                Payload::Deal {
                    commitment,
                    ephemeral,
                    ciphertext,
                }
            }
            2 => Payload::Response {
                dealer: u32::read(buf)?,
                approved: bool::read(buf)?,
                digest: <[u8; DIGEST_LENGTH]>::read(buf)?,
            },
            3 => Payload::Justification {
                dealer: u32::read(buf)?,
                commitment: poly::Public::read_cfg(buf, &coefficients)?,
                share: group::Share::read(buf)?,
            },
            _ => return Err(Error::InvalidEnum(tag)),
        };
        Ok(result)
    }
}

impl EncodeSize for Payload {
    fn encode_size(&self) -> usize {
        1 + match self {
            Payload::Start => 0,
            Payload::Deal {
                commitment,
                ciphertext,
                ..
            } => commitment.encode_size() + group::Public::SIZE + ciphertext.encode_size(),
            Payload::Response { .. } => u32::SIZE + bool::SIZE + DIGEST_LENGTH,
            Payload::Justification { commitment, .. } => {
                u32::SIZE + commitment.encode_size() + group::Share::SIZE
            }
        }
    }
}

/// A partial signature over a beacon round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partial {
    pub round: u64,
    /// The signature of the previous round the partial is chained to, if the signer had it.
    pub previous: Option<group::Signature>,
    pub partial: poly::PartialSignature,
}

impl Partial {
    /// Encode into a buffer ready to send.
    pub fn serialize(&self) -> Bytes {
        self.encode().freeze()
    }
}

impl Write for Partial {
    fn write(&self, buf: &mut impl BufMut) {
        self.round.write(buf);
        self.previous.write(buf);
        self.partial.write(buf);
    }
}

impl Read for Partial {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        Ok(Self {
            round: u64::read(buf)?,
            previous: Option::<group::Signature>::read(buf)?,
            partial: poly::PartialSignature::read(buf)?,
        })
    }
}

impl EncodeSize for Partial {
    fn encode_size(&self) -> usize {
        self.round.encode_size() + self.previous.encode_size() + self.partial.encode_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_codec::{Decode, DecodeExt};
    use beacon_cryptography::bls12381::{
        dkg::ops::{encrypt_share, generate_shares},
        primitives::ops::{keypair, partial_sign_message},
    };
    use rand::{rngs::StdRng, SeedableRng};

    const T: u32 = 3;

    fn roundtrip(original: Dkg) {
        let decoded = Dkg::decode_cfg(original.serialize(), &T).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_dkg_codec() {
        let mut rng = StdRng::seed_from_u64(0);
        let (_, public) = keypair(&mut rng);
        let (commitment, shares) = generate_shares(&mut rng, 4, T);
        let (ephemeral, ciphertext) = encrypt_share(&mut rng, 0, &public, &shares[1]).unwrap();
        assert_eq!(ciphertext.len(), CIPHERTEXT_LENGTH);

        roundtrip(Dkg::new(1, Payload::Start));
        roundtrip(Dkg::new(
            2,
            Payload::Deal {
                commitment: commitment.clone(),
                ephemeral,
                ciphertext: ciphertext.into(),
            },
        ));
        roundtrip(Dkg::new(
            3,
            Payload::Response {
                dealer: 2,
                approved: true,
                digest: [7; DIGEST_LENGTH],
            },
        ));
        roundtrip(Dkg::new(
            4,
            Payload::Justification {
                dealer: 0,
                commitment,
                share: shares[3].clone(),
            },
        ));
    }

    #[test]
    fn test_dkg_rejects_malformed() {
        let mut rng = StdRng::seed_from_u64(1);
        let (commitment, _) = generate_shares(&mut rng, 4, T);
        let justification = Dkg::new(
            1,
            Payload::Justification {
                dealer: 0,
                commitment,
                share: group::Share {
                    index: 1,
                    private: group::Scalar::from_u32(5),
                },
            },
        )
        .serialize();

        // Commitment of the wrong degree
        assert!(Dkg::decode_cfg(justification.clone(), &(T + 1)).is_err());

        // Unknown tag
        let mut unknown = justification.to_vec();
        unknown[8] = 9;
        assert!(matches!(
            Dkg::decode_cfg(unknown.as_slice(), &T),
            Err(Error::InvalidEnum(9))
        ));

        // Trailing bytes
        let mut trailing = justification.to_vec();
        trailing.push(0);
        assert!(matches!(
            Dkg::decode_cfg(trailing.as_slice(), &T),
            Err(Error::ExtraData(1))
        ));
    }

    #[test]
    fn test_partial_codec() {
        let mut rng = StdRng::seed_from_u64(2);
        let (_, shares) = generate_shares(&mut rng, 3, 2);
        let partial = partial_sign_message(&shares[0], None, b"round");
        for previous in [None, Some(partial_sign_message(&shares[1], None, b"prev").value)] {
            let original = Partial {
                round: 9,
                previous,
                partial: partial.clone(),
            };
            let decoded = Partial::decode(original.serialize()).unwrap();
            assert_eq!(original, decoded);
        }
    }
}
