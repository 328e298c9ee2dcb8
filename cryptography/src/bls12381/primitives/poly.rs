//! Polynomial operations over the BLS12-381 scalar field.
//!
//! # Warning
//!
//! The security of the polynomial operations is critical for the overall
//! security of the threshold schemes. Ensure that the scalar field operations
//! are performed over the correct field and that all elements are valid.

use crate::bls12381::primitives::{
    group::{self, Element, Scalar},
    Error,
};
use beacon_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};
use bytes::{Buf, BufMut};
use rand::RngCore;

/// Private polynomials are used to generate secret shares.
pub type Private = Poly<group::Private>;

/// Public polynomials represent commitments to secrets on a private polynomial.
pub type Public = Poly<group::Public>;

/// Signature polynomials are used in threshold signing (where a signature
/// is interpolated using at least `threshold` evaluations).
pub type Signature = Poly<group::Signature>;

/// A partial signature (an evaluation of the signature polynomial).
pub type PartialSignature = Eval<group::Signature>;

/// The encoded length of a [PartialSignature].
pub const PARTIAL_SIGNATURE_LENGTH: usize = u32::SIZE + group::SIGNATURE_LENGTH;

/// A polynomial evaluation at a specific index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eval<C: Element> {
    pub index: u32,
    pub value: C,
}

impl<C: Element> Write for Eval<C> {
    fn write(&self, buf: &mut impl BufMut) {
        self.index.write(buf);
        self.value.write(buf);
    }
}

impl<C: Element> Read for Eval<C> {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let index = u32::read(buf)?;
        let value = C::read(buf)?;
        Ok(Self { index, value })
    }
}

impl<C: Element> FixedSize for Eval<C> {
    const SIZE: usize = u32::SIZE + C::SIZE;
}

/// A polynomial that is using a scalar for the variable x and a generic
/// element for the coefficients.
///
/// The coefficients must be able to multiply the type of the variable,
/// which is always a scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poly<C>(Vec<C>);

/// Returns a new scalar polynomial of the given degree where each coefficient is
/// sampled at random from the provided RNG.
///
/// In the context of secret sharing, the threshold is the degree + 1.
pub fn new_from<R: RngCore>(degree: u32, rng: &mut R) -> Poly<Scalar> {
    let coeffs = (0..=degree).map(|_| Scalar::rand(rng)).collect::<Vec<_>>();
    Poly::<Scalar>(coeffs)
}

impl<C> Poly<C> {
    /// Creates a new polynomial from the given coefficients.
    pub fn from(c: Vec<C>) -> Self {
        Self(c)
    }

    /// Returns the constant term of the polynomial.
    pub fn constant(&self) -> &C {
        &self.0[0]
    }

    /// Returns the degree of the polynomial
    pub fn degree(&self) -> u32 {
        (self.0.len() - 1) as u32 // check size in deserialize, safe to cast
    }

    /// Returns the number of required shares to reconstruct the polynomial.
    ///
    /// This will be the threshold
    pub fn required(&self) -> u32 {
        self.0.len() as u32 // check size in deserialize, safe to cast
    }

    /// Returns the coefficients, lowest degree first.
    pub fn coefficients(&self) -> &[C] {
        &self.0
    }
}

impl<C: Element> Poly<C> {
    /// Commits the scalar polynomial to the group and returns a polynomial over
    /// the group.
    ///
    /// This is done by multiplying each coefficient of the polynomial with the
    /// group's generator.
    pub fn commit(commits: Poly<Scalar>) -> Self {
        let commits = commits
            .0
            .iter()
            .map(|c| {
                let mut commitment = C::one();
                commitment.mul(c);
                commitment
            })
            .collect::<Vec<C>>();

        Poly::<C>::from(commits)
    }

    /// Returns a zero polynomial.
    pub fn zero() -> Self {
        Self::from(vec![C::zero()])
    }

    /// Performs polynomial addition in place
    pub fn add(&mut self, other: &Self) {
        // if we have a smaller degree we should pad with zeros
        if self.0.len() < other.0.len() {
            self.0.resize(other.0.len(), C::zero())
        }

        self.0.iter_mut().zip(&other.0).for_each(|(a, b)| a.add(b))
    }

    /// Evaluates the polynomial at the specified value.
    pub fn evaluate(&self, i: u32) -> Eval<C> {
        // We add +1 because we must never evaluate the polynomial at its first point
        // otherwise it reveals the "secret" value.
        let xi = Scalar::from_u32(i + 1);

        // Use Horner's method to evaluate the polynomial
        let res = self.0.iter().rev().fold(C::zero(), |mut sum, coeff| {
            sum.mul(&xi);
            sum.add(coeff);
            sum
        });
        Eval {
            value: res,
            index: i,
        }
    }

    /// Recovers the constant term of a polynomial of degree less than `t` using at least `t` evaluations of the polynomial.
    ///
    /// Each evaluation is mapped to `x = index + 1`. Evaluations are sorted by index and the
    /// first `t` are used, so two invocations over the same set select the same points.
    ///
    /// # Warning
    ///
    /// Duplicate indices make the interpolation fail with [Error::DuplicateEval].
    pub fn recover<'a, I>(t: u32, evals: I) -> Result<C, Error>
    where
        C: 'a,
        I: IntoIterator<Item = &'a Eval<C>>,
    {
        // Check if we have at least `t` evaluations; if not, return an error
        let t = t as usize;
        let mut evals = evals.into_iter().collect::<Vec<_>>();
        if evals.len() < t {
            return Err(Error::NotEnoughPartialSignatures(t, evals.len()));
        }
        evals.sort_by_key(|e| e.index);
        if evals.windows(2).any(|w| w[0].index == w[1].index) {
            return Err(Error::DuplicateEval);
        }

        // Take the first `t` evaluations and prepare them for interpolation
        let xs = evals
            .into_iter()
            .take(t)
            .map(|e| (e.index, Scalar::from_u32(e.index + 1), &e.value))
            .collect::<Vec<_>>();

        // The constant term is `sum_{i} yi * l_i(0)`, where `l_i(0) = product_{j != i} (xj / (xj - xi))`.
        xs.iter().try_fold(C::zero(), |mut acc, (i, xi, yi)| {
            let (mut num, den) = xs.iter().fold(
                (Scalar::one(), Scalar::one()),
                |(mut num, mut den), (j, xj, _)| {
                    if i != j {
                        num.mul(xj);
                        let mut tmp = *xj;
                        tmp.sub(xi);
                        den.mul(&tmp);
                    }
                    (num, den)
                },
            );
            let inv = den.inverse().ok_or(Error::NoInverse)?;
            num.mul(&inv);

            let mut yi_scaled = **yi;
            yi_scaled.mul(&num);
            acc.add(&yi_scaled);
            Ok(acc)
        })
    }
}

impl<C: Element> Write for Poly<C> {
    fn write(&self, buf: &mut impl BufMut) {
        for c in &self.0 {
            c.write(buf);
        }
    }
}

impl<C: Element> Read for Poly<C> {
    /// The number of coefficients to read.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, expected: &usize) -> Result<Self, CodecError> {
        if *expected == 0 {
            return Err(CodecError::Invalid("Poly", "Empty polynomial"));
        }
        let expected_size = C::SIZE * (*expected);
        if buf.remaining() < expected_size {
            return Err(CodecError::EndOfBuffer);
        }
        let mut coeffs = Vec::with_capacity(*expected);
        for _ in 0..*expected {
            coeffs.push(C::read(buf)?);
        }
        Ok(Self(coeffs))
    }
}

impl<C: Element> EncodeSize for Poly<C> {
    fn encode_size(&self) -> usize {
        C::SIZE * self.0.len()
    }
}

/// Returns the public key of the polynomial (constant term).
pub fn public(public: &Public) -> &group::Public {
    public.constant()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bls12381::primitives::group::{G1, G2};
    use beacon_codec::{Decode, Encode};
    use rand::{rngs::StdRng, SeedableRng};

    fn pow(base: Scalar, pow: usize) -> Scalar {
        let mut res = Scalar::one();
        for _ in 0..pow {
            res.mul(&base)
        }
        res
    }

    #[test]
    fn poly_degree() {
        let mut rng = StdRng::seed_from_u64(0);
        let p = new_from(5, &mut rng);
        assert_eq!(p.degree(), 5);
        assert_eq!(p.required(), 6);
    }

    #[test]
    fn add_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let p1 = new_from(3, &mut rng);
        let mut res = p1.clone();
        res.add(&Poly::<Scalar>::zero());
        assert_eq!(res, p1);

        let mut res = Poly::<Scalar>::zero();
        res.add(&p1);
        assert_eq!(res, p1);
    }

    #[test]
    fn commit() {
        let mut rng = StdRng::seed_from_u64(2);
        let secret = new_from(5, &mut rng);
        let commitment = secret
            .0
            .iter()
            .map(|coeff| {
                let mut p = G2::one();
                p.mul(coeff);
                p
            })
            .collect::<Vec<_>>();
        assert_eq!(Poly::from(commitment), Poly::commit(secret));
    }

    #[test]
    fn evaluate() {
        let mut rng = StdRng::seed_from_u64(3);
        for d in 0..8u32 {
            let p = new_from(d, &mut rng);
            for idx in 0..8u32 {
                let x = Scalar::from_u32(idx + 1);
                let mut sum = p.0[0];
                for (i, coeff) in p.0.iter().enumerate().skip(1) {
                    let mut var = *coeff;
                    var.mul(&pow(x, i));
                    sum.add(&var);
                }
                assert_eq!(sum, p.evaluate(idx).value, "degree={d}, idx={idx}");
            }
        }
    }

    #[test]
    fn interpolation() {
        let mut rng = StdRng::seed_from_u64(4);
        for degree in 0..6u32 {
            for num_evals in 1..8u32 {
                let poly = new_from(degree, &mut rng);
                let expected = poly.0[0];
                let shares = (0..num_evals).map(|i| poly.evaluate(i)).collect::<Vec<_>>();
                let recovered = Poly::recover(num_evals, &shares).unwrap();
                if num_evals > degree {
                    assert_eq!(expected, recovered, "degree={degree}, num_evals={num_evals}");
                } else {
                    assert_ne!(expected, recovered, "degree={degree}, num_evals={num_evals}");
                }
            }
        }
    }

    #[test]
    fn interpolation_insufficient_shares() {
        let mut rng = StdRng::seed_from_u64(5);
        let poly = new_from(4, &mut rng);
        let shares = (0..4).map(|i| poly.evaluate(i)).collect::<Vec<_>>();
        assert!(matches!(
            Poly::recover(5, &shares),
            Err(Error::NotEnoughPartialSignatures(5, 4))
        ));
    }

    #[test]
    fn interpolation_duplicate_index() {
        let mut rng = StdRng::seed_from_u64(6);
        let poly = new_from(1, &mut rng);
        let share = poly.evaluate(0);
        assert!(matches!(
            Poly::recover(2, &[share, share]),
            Err(Error::DuplicateEval)
        ));
    }

    #[test]
    fn commitment_matches_public_evaluation() {
        let mut rng = StdRng::seed_from_u64(7);
        let secret = new_from(2, &mut rng);
        let public = Public::commit(secret.clone());
        for i in 0..5 {
            let mut expected = G1::one();
            expected.mul(&secret.evaluate(i).value);
            assert_eq!(public.evaluate(i).value, expected);
        }
    }

    #[test]
    fn test_codec() {
        let mut rng = StdRng::seed_from_u64(8);
        let original = Public::commit(new_from(3, &mut rng));
        let encoded = original.encode();
        assert_eq!(encoded.len(), 4 * G1::SIZE);
        let decoded = Public::decode_cfg(encoded.clone(), &4).unwrap();
        assert_eq!(original, decoded);
        assert!(Public::decode_cfg(encoded, &3).is_err());
    }
}
