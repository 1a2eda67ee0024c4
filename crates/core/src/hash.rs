//! Content checksums using CRC-64 (ISO polynomial)

use crc::{Crc, CRC_64_GO_ISO};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// Checksum of a text's UTF-8 bytes.
///
/// Used to compare cache entries across peers without shipping content.
#[must_use]
pub fn crc64(text: &str) -> u64 {
    CRC64.checksum(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = crc64("test string 1\nline two");
        let b = crc64("test string 1\nline two");
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_different_checksum() {
        assert_ne!(crc64("hello"), crc64("world"));
        assert_ne!(crc64(""), crc64(" "));
    }

    #[test]
    fn empty_is_zero() {
        // CRC-64/ISO of the empty message
        assert_eq!(crc64(""), 0);
    }
}
