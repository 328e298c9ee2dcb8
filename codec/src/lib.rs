//! Serialize structured data.
//!
//! # Overview
//!
//! A binary serialization library designed to:
//! - Serialize protocol messages into a stable binary format
//! - Deserialize untrusted binary input into structured data without
//!   allocating more than the caller allows
//!
//! # Supported Types
//!
//! Natively supports `u8`, `u16`, `u32`, `u64`, `bool`, `[u8; N]`, [bytes::Bytes],
//! `Vec<T>` and `Option<T>`. Length-prefixed collections are bounded on read by a
//! [RangeCfg] supplied by the caller.
//!
//! # Example
//!
//! ```
//! use beacon_codec::{Decode, Encode, EncodeSize, Error, Read, ReadExt, Write};
//! use bytes::{Buf, BufMut};
//!
//! #[derive(Debug, PartialEq)]
//! struct Ping {
//!     round: u64,
//!     tag: Option<u32>,
//! }
//!
//! impl Write for Ping {
//!     fn write(&self, buf: &mut impl BufMut) {
//!         self.round.write(buf);
//!         self.tag.write(buf);
//!     }
//! }
//!
//! impl Read for Ping {
//!     type Cfg = ();
//!
//!     fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
//!         let round = u64::read(buf)?;
//!         let tag = Option::<u32>::read(buf)?;
//!         Ok(Self { round, tag })
//!     }
//! }
//!
//! impl EncodeSize for Ping {
//!     fn encode_size(&self) -> usize {
//!         self.round.encode_size() + self.tag.encode_size()
//!     }
//! }
//!
//! let ping = Ping { round: 7, tag: Some(1) };
//! let decoded = Ping::decode_cfg(ping.encode(), &()).unwrap();
//! assert_eq!(ping, decoded);
//! ```

pub mod codec;
pub mod error;
pub mod types;
pub mod varint;

pub use codec::{Decode, DecodeExt, Encode, EncodeSize, FixedSize, RangeCfg, Read, ReadExt, Write};
pub use error::Error;
