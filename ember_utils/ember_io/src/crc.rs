//! CRC64 content identities for corpus file names.
//!
//! The output-directory naming scheme depends on these values being stable
//! across platforms and runs, so the polynomial is fixed (CRC-64/XZ).

use crc::{Crc, CRC_64_XZ};

const CRC64_ALG: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// CRC64 over `data`, front to back.
pub fn crc64(data: &[u8]) -> u64 {
    CRC64_ALG.checksum(data)
}

/// The same CRC64 computed over `data` back to front.
pub fn crc64_rev(data: &[u8]) -> u64 {
    let mut digest = CRC64_ALG.digest();
    for b in data.iter().rev() {
        digest.update(std::slice::from_ref(b));
    }
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc64_matches_the_xz_check_value() {
        assert_eq!(crc64(b"123456789"), 0x995dc9bbdf1939fa);
    }

    #[test]
    fn crc64_rev_is_crc64_of_reversed_bytes() {
        assert_eq!(crc64_rev(b"abc"), crc64(b"cba"));
        assert_eq!(crc64_rev(b""), crc64(b""));
    }

    #[test]
    fn different_data_different_identity() {
        assert_ne!(crc64(b"abc"), crc64(b"abd"));
        // A palindrome collapses forward and reverse, anything else won't.
        assert_ne!(crc64(b"abc"), crc64_rev(b"abc"));
    }
}
