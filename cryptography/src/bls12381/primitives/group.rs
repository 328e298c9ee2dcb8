//! Group operations over the BLS12-381 scalar field.
//!
//! This module implements basic group operations over BLS12-381 elements,
//! including point addition, scalar multiplication, and pairing operations.
//!
//! # Warning
//!
//! Ensure that points are checked to belong to the correct subgroup
//! (G1 or G2) to prevent small subgroup attacks. This is particularly important
//! when handling points received from untrusted sources. This is already taken
//! care of for you if you decode points with [Read].

use beacon_codec::{Error as CodecError, FixedSize, Read, ReadExt, Write};
use blst::{
    blst_bendian_from_scalar, blst_final_exp, blst_fp12, blst_fp12_is_equal, blst_fr,
    blst_fr_add, blst_fr_from_scalar, blst_fr_from_uint64, blst_fr_inverse, blst_fr_mul,
    blst_fr_sub, blst_hash_to_g2, blst_keygen_v3, blst_miller_loop, blst_p1,
    blst_p1_add_or_double, blst_p1_affine, blst_p1_compress, blst_p1_from_affine,
    blst_p1_in_g1, blst_p1_is_equal, blst_p1_is_inf, blst_p1_mult, blst_p1_to_affine,
    blst_p1_uncompress, blst_p2, blst_p2_add_or_double, blst_p2_affine, blst_p2_compress,
    blst_p2_from_affine, blst_p2_in_g2, blst_p2_is_equal, blst_p2_is_inf, blst_p2_mult,
    blst_p2_to_affine, blst_p2_uncompress, blst_scalar, blst_scalar_fr_check,
    blst_scalar_from_bendian, blst_scalar_from_fr, BLS12_381_G1, BLS12_381_G2, BLST_ERROR,
};
use bytes::{Buf, BufMut};
use rand::RngCore;
use std::{fmt, ptr};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// An element of a group.
pub trait Element:
    Write + Read<Cfg = ()> + FixedSize + Clone + Copy + Eq + fmt::Debug + Send + Sync
{
    /// Returns the additive identity.
    fn zero() -> Self;

    /// Returns the multiplicative identity.
    fn one() -> Self;

    /// Adds to self in-place.
    fn add(&mut self, rhs: &Self);

    /// Multiplies self in-place.
    fn mul(&mut self, rhs: &Scalar);
}

/// An element of a group that supports message hashing.
pub trait Point: Element {
    /// Maps the provided data to a group element.
    fn map(&mut self, message: &[u8]);
}

#[derive(Clone, Copy, Eq, PartialEq)]
#[repr(transparent)]
pub struct Scalar(blst_fr);

pub const SCALAR_LENGTH: usize = 32;

/// `R = 2^256 mod q` in little-endian Montgomery form which is equivalent to 1 in little-endian
/// non-Montgomery form.
const BLST_FR_ONE: Scalar = Scalar(blst_fr {
    l: [
        0x0000_0001_ffff_fffe,
        0x5884_b7fa_0003_4802,
        0x998c_4fef_ecbc_4ff5,
        0x1824_b159_acc5_056f,
    ],
});

#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct G1(blst_p1);

pub const G1_ELEMENT_BYTE_LENGTH: usize = 48;

#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct G2(blst_p2);

pub const G2_ELEMENT_BYTE_LENGTH: usize = 96;

/// Domain separation tag for hashing a message to G2.
pub const DST_G2: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

struct GT(blst_fp12);

pub type Private = Scalar;
pub const PRIVATE_KEY_LENGTH: usize = SCALAR_LENGTH;
pub type Public = G1;
pub const PUBLIC_KEY_LENGTH: usize = G1_ELEMENT_BYTE_LENGTH;
pub type Signature = G2;
pub const SIGNATURE_LENGTH: usize = G2_ELEMENT_BYTE_LENGTH;

/// Returns the size in bits of a given blst_scalar (represented in little-endian).
fn bits(scalar: &blst_scalar) -> usize {
    let mut bits: usize = SCALAR_LENGTH * 8;
    for i in scalar.b.iter().rev() {
        let leading = i.leading_zeros();
        bits -= leading as usize;
        if leading < 8 {
            break;
        }
    }
    bits
}

impl Scalar {
    /// Generates a random scalar using the provided RNG.
    pub fn rand<R: RngCore>(rng: &mut R) -> Self {
        // Generate a random 64 byte buffer
        let mut ikm = [0u8; 64];
        rng.fill_bytes(&mut ikm);

        // Generate a scalar from the randomly populated buffer
        let mut ret = blst_fr::default();
        unsafe {
            let mut sc = blst_scalar::default();
            blst_keygen_v3(&mut sc, ikm.as_ptr(), ikm.len(), ptr::null(), 0);
            blst_fr_from_scalar(&mut ret, &sc);
        }
        ikm.zeroize();
        Self(ret)
    }

    /// Sets the scalar to be the provided integer.
    pub fn set_int(&mut self, i: u32) {
        // blst requires a buffer of 4 uint64 values (it reads past a shorter one)
        let buffer = [i as u64, 0, 0, 0];
        unsafe { blst_fr_from_uint64(&mut self.0, buffer.as_ptr()) };
    }

    /// Returns the scalar `i`.
    pub fn from_u32(i: u32) -> Self {
        let mut scalar = Self::zero();
        scalar.set_int(i);
        scalar
    }

    /// Computes the inverse of the scalar.
    pub fn inverse(&self) -> Option<Self> {
        if *self == Self::zero() {
            return None;
        }
        let mut ret = blst_fr::default();
        unsafe { blst_fr_inverse(&mut ret, &self.0) };
        Some(Self(ret))
    }

    /// Subtracts the provided scalar from self in-place.
    pub fn sub(&mut self, rhs: &Self) {
        unsafe { blst_fr_sub(&mut self.0, &self.0, &rhs.0) }
    }

    fn as_blst_scalar(&self) -> blst_scalar {
        let mut scalar = blst_scalar::default();
        unsafe { blst_scalar_from_fr(&mut scalar, &self.0) };
        scalar
    }
}

impl Zeroize for Scalar {
    fn zeroize(&mut self) {
        self.0.l.zeroize();
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Scalar(..)")
    }
}

impl Element for Scalar {
    fn zero() -> Self {
        Self(blst_fr::default())
    }

    fn one() -> Self {
        BLST_FR_ONE
    }

    fn add(&mut self, rhs: &Self) {
        unsafe {
            blst_fr_add(&mut self.0, &self.0, &rhs.0);
        }
    }

    fn mul(&mut self, rhs: &Self) {
        unsafe {
            blst_fr_mul(&mut self.0, &self.0, &rhs.0);
        }
    }
}

impl Write for Scalar {
    fn write(&self, buf: &mut impl BufMut) {
        let mut bytes = [0u8; SCALAR_LENGTH];
        let mut scalar = self.as_blst_scalar();
        unsafe { blst_bendian_from_scalar(bytes.as_mut_ptr(), &scalar) };
        buf.put_slice(&bytes);
        scalar.b.zeroize();
        bytes.zeroize();
    }
}

impl Read for Scalar {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let mut bytes = <[u8; SCALAR_LENGTH]>::read(buf)?;
        let mut ret = blst_fr::default();
        let valid = unsafe {
            let mut scalar = blst_scalar::default();
            blst_scalar_from_bendian(&mut scalar, bytes.as_ptr());
            let valid = blst_scalar_fr_check(&scalar);
            if valid {
                blst_fr_from_scalar(&mut ret, &scalar);
            }
            scalar.b.zeroize();
            valid
        };
        bytes.zeroize();
        if !valid {
            return Err(CodecError::Invalid("Scalar", "Non-canonical"));
        }
        Ok(Self(ret))
    }
}

impl FixedSize for Scalar {
    const SIZE: usize = SCALAR_LENGTH;
}

impl PartialEq for G1 {
    fn eq(&self, other: &Self) -> bool {
        unsafe { blst_p1_is_equal(&self.0, &other.0) }
    }
}

impl Eq for G1 {}

impl fmt::Debug for G1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G1({})", beacon_utils::hex(&self.compress()))
    }
}

impl G1 {
    fn compress(&self) -> [u8; G1_ELEMENT_BYTE_LENGTH] {
        let mut bytes = [0u8; G1_ELEMENT_BYTE_LENGTH];
        unsafe { blst_p1_compress(bytes.as_mut_ptr(), &self.0) };
        bytes
    }

    fn as_affine(&self) -> blst_p1_affine {
        let mut affine = blst_p1_affine::default();
        unsafe { blst_p1_to_affine(&mut affine, &self.0) };
        affine
    }
}

impl Element for G1 {
    fn zero() -> Self {
        Self(blst_p1::default())
    }

    fn one() -> Self {
        let mut ret = blst_p1::default();
        unsafe {
            blst_p1_from_affine(&mut ret, &BLS12_381_G1);
        }
        Self(ret)
    }

    fn add(&mut self, rhs: &Self) {
        unsafe {
            blst_p1_add_or_double(&mut self.0, &self.0, &rhs.0);
        }
    }

    fn mul(&mut self, rhs: &Scalar) {
        let mut scalar = rhs.as_blst_scalar();
        unsafe {
            blst_p1_mult(&mut self.0, &self.0, scalar.b.as_ptr(), bits(&scalar));
        }
        scalar.b.zeroize();
    }
}

impl Write for G1 {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.compress());
    }
}

impl Read for G1 {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let bytes = <[u8; G1_ELEMENT_BYTE_LENGTH]>::read(buf)?;
        let mut ret = blst_p1::default();
        unsafe {
            let mut affine = blst_p1_affine::default();
            if blst_p1_uncompress(&mut affine, bytes.as_ptr()) != BLST_ERROR::BLST_SUCCESS {
                return Err(CodecError::Invalid("G1", "Invalid encoding"));
            }
            blst_p1_from_affine(&mut ret, &affine);

            // Verify that deserialized element isn't infinite
            if blst_p1_is_inf(&ret) {
                return Err(CodecError::Invalid("G1", "Element is identity"));
            }

            // Verify that the deserialized element is in G1
            if !blst_p1_in_g1(&ret) {
                return Err(CodecError::Invalid("G1", "Not in subgroup"));
            }
        }
        Ok(Self(ret))
    }
}

impl FixedSize for G1 {
    const SIZE: usize = G1_ELEMENT_BYTE_LENGTH;
}

impl PartialEq for G2 {
    fn eq(&self, other: &Self) -> bool {
        unsafe { blst_p2_is_equal(&self.0, &other.0) }
    }
}

impl Eq for G2 {}

impl fmt::Debug for G2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G2({})", beacon_utils::hex(&self.compress()))
    }
}

impl G2 {
    fn compress(&self) -> [u8; G2_ELEMENT_BYTE_LENGTH] {
        let mut bytes = [0u8; G2_ELEMENT_BYTE_LENGTH];
        unsafe { blst_p2_compress(bytes.as_mut_ptr(), &self.0) };
        bytes
    }

    fn as_affine(&self) -> blst_p2_affine {
        let mut affine = blst_p2_affine::default();
        unsafe { blst_p2_to_affine(&mut affine, &self.0) };
        affine
    }
}

impl Element for G2 {
    fn zero() -> Self {
        Self(blst_p2::default())
    }

    fn one() -> Self {
        let mut ret = blst_p2::default();
        unsafe {
            blst_p2_from_affine(&mut ret, &BLS12_381_G2);
        }
        Self(ret)
    }

    fn add(&mut self, rhs: &Self) {
        unsafe {
            blst_p2_add_or_double(&mut self.0, &self.0, &rhs.0);
        }
    }

    fn mul(&mut self, rhs: &Scalar) {
        let mut scalar = rhs.as_blst_scalar();
        unsafe {
            blst_p2_mult(&mut self.0, &self.0, scalar.b.as_ptr(), bits(&scalar));
        }
        scalar.b.zeroize();
    }
}

impl Point for G2 {
    fn map(&mut self, data: &[u8]) {
        unsafe {
            blst_hash_to_g2(
                &mut self.0,
                data.as_ptr(),
                data.len(),
                DST_G2.as_ptr(),
                DST_G2.len(),
                ptr::null(),
                0,
            );
        }
    }
}

impl Write for G2 {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.compress());
    }
}

impl Read for G2 {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let bytes = <[u8; G2_ELEMENT_BYTE_LENGTH]>::read(buf)?;
        let mut ret = blst_p2::default();
        unsafe {
            let mut affine = blst_p2_affine::default();
            if blst_p2_uncompress(&mut affine, bytes.as_ptr()) != BLST_ERROR::BLST_SUCCESS {
                return Err(CodecError::Invalid("G2", "Invalid encoding"));
            }
            blst_p2_from_affine(&mut ret, &affine);

            // Verify that deserialized element isn't infinite
            if blst_p2_is_inf(&ret) {
                return Err(CodecError::Invalid("G2", "Element is identity"));
            }

            // Verify that the deserialized element is in G2
            if !blst_p2_in_g2(&ret) {
                return Err(CodecError::Invalid("G2", "Not in subgroup"));
            }
        }
        Ok(Self(ret))
    }
}

impl FixedSize for G2 {
    const SIZE: usize = G2_ELEMENT_BYTE_LENGTH;
}

/// A share of a threshold signing key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// The share's index in the polynomial.
    pub index: u32,
    /// The scalar corresponding to the share's secret.
    pub private: Private,
}

impl Share {
    /// Returns the public key corresponding to the share.
    ///
    /// This can be verified against the public polynomial.
    pub fn public(&self) -> Public {
        let mut public = Public::one();
        public.mul(&self.private);
        public
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share").field("index", &self.index).finish()
    }
}

impl Write for Share {
    fn write(&self, buf: &mut impl BufMut) {
        self.index.write(buf);
        self.private.write(buf);
    }
}

impl Read for Share {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let index = u32::read(buf)?;
        let private = Private::read(buf)?;
        Ok(Self { index, private })
    }
}

impl FixedSize for Share {
    const SIZE: usize = u32::SIZE + PRIVATE_KEY_LENGTH;
}

fn pairing(p: &G1, q: &G2) -> GT {
    let pa = p.as_affine();
    let qa = q.as_affine();
    let mut res = blst_fp12::default();
    unsafe {
        blst_miller_loop(&mut res, &qa, &pa);
        blst_final_exp(&mut res, &res);
    }
    GT(res)
}

/// Checks `e(g1, sig) == e(public, hm)`.
pub(super) fn equal(public: &G1, sig: &G2, hm: &G2) -> bool {
    let left = pairing(&G1::one(), sig);
    let right = pairing(public, hm);
    unsafe { blst_fp12_is_equal(&left.0, &right.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_codec::{DecodeExt, Encode};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn basic_group() {
        let mut rng = StdRng::seed_from_u64(0);
        let s = Scalar::rand(&mut rng);
        let mut s2 = s;
        s2.add(&s);

        // p1 = (s+s) * G
        let mut p1 = G1::one();
        p1.mul(&s2);

        // p2 = sG + sG
        let mut p2 = G1::one();
        p2.mul(&s);
        p2.add(&p2.clone());
        assert_eq!(p1, p2);
    }

    #[test]
    fn scalar_inverse() {
        let mut rng = StdRng::seed_from_u64(1);
        let s = Scalar::rand(&mut rng);
        let mut product = s.inverse().unwrap();
        product.mul(&s);
        assert_eq!(product, Scalar::one());
        assert!(Scalar::zero().inverse().is_none());
    }

    #[test]
    fn codec_rejects_identity() {
        let mut bytes = G1::zero().encode();
        assert!(matches!(
            G1::decode(&mut bytes),
            Err(CodecError::Invalid("G1", _))
        ));
        let bytes = G2::zero().encode();
        assert!(G2::decode(bytes).is_err());
    }

    #[test]
    fn codec_round_trips_points() {
        let mut rng = StdRng::seed_from_u64(2);
        let s = Scalar::rand(&mut rng);
        let mut p = G1::one();
        p.mul(&s);
        assert_eq!(G1::decode(p.encode()).unwrap(), p);

        let share = Share { index: 3, private: s };
        let decoded = Share::decode(share.encode()).unwrap();
        assert_eq!(decoded, share);
        assert_eq!(decoded.public(), p);
    }

    #[test]
    fn scalar_rejects_non_canonical() {
        let bytes = [0xffu8; SCALAR_LENGTH];
        assert!(Scalar::decode(&bytes[..]).is_err());
    }
}
