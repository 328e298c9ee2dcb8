//! Codec implementations for common types.

use crate::{
    codec::{at_least, EncodeSize, FixedSize, RangeCfg, Read, Write},
    varint, Error,
};
use bytes::{Buf, BufMut, Bytes};

macro_rules! impl_primitive {
    ($type:ty, $get:ident, $put:ident) => {
        impl Write for $type {
            #[inline]
            fn write(&self, buf: &mut impl BufMut) {
                buf.$put(*self);
            }
        }

        impl Read for $type {
            type Cfg = ();

            #[inline]
            fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
                at_least(buf, std::mem::size_of::<$type>())?;
                Ok(buf.$get())
            }
        }

        impl FixedSize for $type {
            const SIZE: usize = std::mem::size_of::<$type>();
        }
    };
}

impl_primitive!(u8, get_u8, put_u8);
impl_primitive!(u16, get_u16, put_u16);
impl_primitive!(u32, get_u32, put_u32);
impl_primitive!(u64, get_u64, put_u64);

impl Write for bool {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(u8::from(*self));
    }
}

impl Read for bool {
    type Cfg = ();

    #[inline]
    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        match u8::read_cfg(buf, &())? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::InvalidBool),
        }
    }
}

impl FixedSize for bool {
    const SIZE: usize = 1;
}

impl<const N: usize> Write for [u8; N] {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(self);
    }
}

impl<const N: usize> Read for [u8; N] {
    type Cfg = ();

    #[inline]
    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        at_least(buf, N)?;
        let mut array = [0u8; N];
        buf.copy_to_slice(&mut array);
        Ok(array)
    }
}

impl<const N: usize> FixedSize for [u8; N] {
    const SIZE: usize = N;
}

/// Writes a collection length prefix.
///
/// Panics if `len` does not fit in a `u32` (we never produce such messages).
fn write_len(len: usize, buf: &mut impl BufMut) {
    let len = u32::try_from(len).expect("length exceeds u32");
    varint::write(len, buf);
}

fn len_size(len: usize) -> usize {
    varint::size(u32::try_from(len).expect("length exceeds u32"))
}

/// Reads a collection length prefix and checks it against `range`.
fn read_len(buf: &mut impl Buf, range: &RangeCfg) -> Result<usize, Error> {
    let len = varint::read(buf)? as usize;
    if !range.contains(&len) {
        return Err(Error::InvalidLength(len));
    }
    Ok(len)
}

impl Write for Bytes {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        write_len(self.len(), buf);
        buf.put_slice(self);
    }
}

impl EncodeSize for Bytes {
    #[inline]
    fn encode_size(&self) -> usize {
        len_size(self.len()) + self.len()
    }
}

impl Read for Bytes {
    type Cfg = RangeCfg;

    #[inline]
    fn read_cfg(buf: &mut impl Buf, range: &RangeCfg) -> Result<Self, Error> {
        let len = read_len(buf, range)?;
        at_least(buf, len)?;
        Ok(buf.copy_to_bytes(len))
    }
}

impl<T: Write> Write for Vec<T> {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        write_len(self.len(), buf);
        for item in self {
            item.write(buf);
        }
    }
}

impl<T: EncodeSize> EncodeSize for Vec<T> {
    #[inline]
    fn encode_size(&self) -> usize {
        len_size(self.len()) + self.iter().map(EncodeSize::encode_size).sum::<usize>()
    }
}

impl<T: Read> Read for Vec<T> {
    type Cfg = (RangeCfg, T::Cfg);

    #[inline]
    fn read_cfg(buf: &mut impl Buf, (range, cfg): &Self::Cfg) -> Result<Self, Error> {
        let len = read_len(buf, range)?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::read_cfg(buf, cfg)?);
        }
        Ok(items)
    }
}

impl<T: Write> Write for Option<T> {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Some(inner) => {
                true.write(buf);
                inner.write(buf);
            }
            None => false.write(buf),
        }
    }
}

impl<T: EncodeSize> EncodeSize for Option<T> {
    #[inline]
    fn encode_size(&self) -> usize {
        1 + self.as_ref().map_or(0, EncodeSize::encode_size)
    }
}

impl<T: Read> Read for Option<T> {
    type Cfg = T::Cfg;

    #[inline]
    fn read_cfg(buf: &mut impl Buf, cfg: &T::Cfg) -> Result<Self, Error> {
        if bool::read_cfg(buf, &())? {
            Ok(Some(T::read_cfg(buf, cfg)?))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Decode, DecodeExt, Encode};

    #[test]
    fn test_primitives() {
        let encoded = 0x0102_0304u32.encode();
        assert_eq!(encoded.as_ref(), &[1, 2, 3, 4]);
        assert_eq!(u32::decode(encoded).unwrap(), 0x0102_0304);
        assert_eq!(bool::decode(&[2u8][..]), Err(Error::InvalidBool));
    }

    #[test]
    fn test_vec_bounds() {
        let value = vec![1u64, 2, 3];
        let encoded = value.encode();
        assert_eq!(encoded.len(), 1 + 3 * 8);
        let decoded = Vec::<u64>::decode_cfg(encoded.clone(), &(3..=3, ())).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(
            Vec::<u64>::decode_cfg(encoded, &(0..=2, ())),
            Err(Error::InvalidLength(3))
        );
    }

    #[test]
    fn test_bytes_truncated() {
        let value = Bytes::from_static(b"beacon");
        let encoded = value.encode().freeze();
        let truncated = encoded.slice(..encoded.len() - 1);
        assert_eq!(
            Bytes::decode_cfg(truncated, &(0..=16)),
            Err(Error::EndOfBuffer)
        );
        assert_eq!(Bytes::decode_cfg(encoded, &(0..=16)).unwrap(), value);
    }

    #[test]
    fn test_option() {
        let some = Some(7u16);
        assert_eq!(some.encode_size(), 3);
        assert_eq!(Option::<u16>::decode(some.encode()).unwrap(), some);
        let none: Option<u16> = None;
        assert_eq!(Option::<u16>::decode(none.encode()).unwrap(), none);
    }
}
