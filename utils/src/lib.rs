//! Leverage common functionality across the beacon crates.

use beacon_codec::varint;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod signal;

/// Length of a SHA-256 digest.
pub const DIGEST_LENGTH: usize = 32;

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Hashes the given bytes using SHA-256.
pub fn hash(bytes: &[u8]) -> [u8; DIGEST_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Concatenate a namespace and a message, prepended by a varint encoding of the namespace length.
///
/// This produces a unique byte sequence (i.e. no collisions) for each `(namespace, msg)` pair.
pub fn union_unique(namespace: &[u8], msg: &[u8]) -> Vec<u8> {
    let len = u32::try_from(namespace.len()).expect("namespace exceeds u32");
    let mut result = Vec::with_capacity(varint::size(len) + namespace.len() + msg.len());
    varint::write(len, &mut result);
    result.extend_from_slice(namespace);
    result.extend_from_slice(msg);
    result
}

/// Milliseconds elapsed since the unix epoch (zero if the clock is set before it).
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Milliseconds elapsed since the unix epoch, now.
pub fn now_millis() -> u64 {
    epoch_millis(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_hex() {
        // Test case 0: empty bytes
        assert_eq!(hex(&[]), "");

        // Test case 1: multiple bytes
        assert_eq!(hex(&[0x01, 0xab, 0xff]), "01abff");

        // Test case 2: leading zeros are kept
        assert_eq!(hex(&[0x00, 0x0a]), "000a");
    }

    #[test]
    fn test_hash() {
        assert_eq!(
            hex(&hash(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        );
    }

    #[test]
    fn test_union_unique() {
        let namespace = b"namespace";
        let msg = b"message";

        let length_encoding = vec![0b0000_1001];
        let mut expected = Vec::with_capacity(length_encoding.len() + namespace.len() + msg.len());
        expected.extend_from_slice(&length_encoding);
        expected.extend_from_slice(namespace);
        expected.extend_from_slice(msg);

        assert_eq!(union_unique(namespace, msg), expected);

        // Shifting bytes between namespace and message must change the output
        assert_ne!(union_unique(b"ab", b"c"), union_unique(b"a", b"bc"));
    }

    #[test]
    fn test_union_unique_long_namespace() {
        let namespace = vec![b'a'; 300];
        let result = union_unique(&namespace, b"x");
        assert_eq!(&result[..2], &[0xac, 0x02]);
        assert_eq!(result.len(), 2 + 300 + 1);
    }

    #[test]
    fn test_epoch_millis() {
        assert_eq!(epoch_millis(UNIX_EPOCH), 0);
        assert_eq!(epoch_millis(UNIX_EPOCH + Duration::from_millis(1_500)), 1_500);
        assert_eq!(epoch_millis(UNIX_EPOCH - Duration::from_secs(1)), 0);
    }
}
