//! Messages exchanged between peers.

use super::Error;
use crate::Channel;
use beacon_codec::{
    EncodeSize, Error as CodecError, FixedSize, RangeCfg, Read, ReadExt, Write,
};
use beacon_cryptography::bls12381::primitives::{
    group::{self, SIGNATURE_LENGTH},
    ops::{sign_message, verify_message},
};
use bytes::{Buf, BufMut, Bytes};

/// Suffix appended to the network namespace when signing a [Hello].
const HELLO_SUFFIX: &[u8] = b"_HELLO";

/// First frame sent by a dialer, proving its identity to the recipient.
///
/// The signature covers `recipient || dialer || timestamp`, so a captured
/// handshake cannot be replayed against another peer or after it has aged out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hello {
    pub dialer: u32,
    pub recipient: u32,
    pub timestamp: u64,
    pub signature: group::Signature,
}

impl Hello {
    fn namespace(namespace: &[u8]) -> Vec<u8> {
        let mut hello = Vec::with_capacity(namespace.len() + HELLO_SUFFIX.len());
        hello.extend_from_slice(namespace);
        hello.extend_from_slice(HELLO_SUFFIX);
        hello
    }

    fn payload(dialer: u32, recipient: u32, timestamp: u64) -> [u8; 16] {
        let mut payload = [0u8; 16];
        payload[..4].copy_from_slice(&recipient.to_be_bytes());
        payload[4..8].copy_from_slice(&dialer.to_be_bytes());
        payload[8..].copy_from_slice(&timestamp.to_be_bytes());
        payload
    }

    /// Create a signed handshake from `dialer` to `recipient`.
    pub fn sign(
        signer: &group::Private,
        namespace: &[u8],
        dialer: u32,
        recipient: u32,
        timestamp: u64,
    ) -> Self {
        let signature = sign_message(
            signer,
            Some(&Self::namespace(namespace)),
            &Self::payload(dialer, recipient, timestamp),
        );
        Self {
            dialer,
            recipient,
            timestamp,
            signature,
        }
    }

    /// Verify the handshake was signed by `public`.
    pub fn verify(&self, namespace: &[u8], public: &group::Public) -> Result<(), Error> {
        verify_message(
            public,
            Some(&Self::namespace(namespace)),
            &Self::payload(self.dialer, self.recipient, self.timestamp),
            &self.signature,
        )
        .map_err(|_| Error::InvalidSignature)
    }
}

impl Write for Hello {
    fn write(&self, buf: &mut impl BufMut) {
        self.dialer.write(buf);
        self.recipient.write(buf);
        self.timestamp.write(buf);
        self.signature.write(buf);
    }
}

impl Read for Hello {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            dialer: u32::read(buf)?,
            recipient: u32::read(buf)?,
            timestamp: u64::read(buf)?,
            signature: group::Signature::read(buf)?,
        })
    }
}

impl FixedSize for Hello {
    const SIZE: usize = u32::SIZE + u32::SIZE + u64::SIZE + SIGNATURE_LENGTH;
}

/// A payload sent on a [Channel].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Data {
    pub channel: Channel,
    pub message: Bytes,
}

impl Write for Data {
    fn write(&self, buf: &mut impl BufMut) {
        self.channel.write(buf);
        self.message.write(buf);
    }
}

impl Read for Data {
    /// Maximum size of `message`.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max: &usize) -> Result<Self, CodecError> {
        let channel = Channel::read(buf)?;
        let range: RangeCfg = 0..=*max;
        let message = Bytes::read_cfg(buf, &range)?;
        Ok(Self { channel, message })
    }
}

impl EncodeSize for Data {
    fn encode_size(&self) -> usize {
        self.channel.encode_size() + self.message.encode_size()
    }
}
