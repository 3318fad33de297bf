//! AES-CMAC (NIST SP 800-38B)
//!
//! Full subkey derivation over the AES-128 block primitive. The tag is 16
//! bytes; the dynamic-messaging protocol transmits the leftmost 8.

use crate::bytes;

use super::{AesOperations, CryptoError};

/// AES-CMAC Operations
pub struct CmacOperations;

impl CmacOperations {
    /// Full tag size in bytes
    pub const TAG_SIZE: usize = 16;

    /// Truncated tag size transmitted on the wire
    pub const TRUNCATED_TAG_SIZE: usize = 8;

    /// Low byte of the constant R_128 = 0^120 || 10000111
    const R_B: u8 = 0x87;

    /// Derive the two CMAC subkeys from the cipher key.
    ///
    /// `L = E_K(0^128)`; each subkey is the previous value shifted left by
    /// one bit, folded with `R_b` when the bit shifted out was set.
    fn derive_subkeys(key: &[u8]) -> Result<([u8; 16], [u8; 16]), CryptoError> {
        let l = AesOperations::encrypt_block(key, &[0u8; 16])?;

        let mut k1 = bytes::shift_left_one(&l);
        if l[0] & 0x80 != 0 {
            k1[15] ^= Self::R_B;
        }

        let mut k2 = bytes::shift_left_one(&k1);
        if k1[0] & 0x80 != 0 {
            k2[15] ^= Self::R_B;
        }

        Ok((k1, k2))
    }

    /// Compute the full 16-byte CMAC tag of a message.
    pub fn mac(key: &[u8], message: &[u8]) -> Result<[u8; 16], CryptoError> {
        let (k1, k2) = Self::derive_subkeys(key)?;

        // Build the final block: a complete last block is folded with K1,
        // anything else (including the empty message) is padded with
        // 0x80 00.. and folded with K2.
        let mut last = [0u8; 16];
        let full_blocks;
        let subkey;
        if !message.is_empty() && message.len() % AesOperations::BLOCK_SIZE == 0 {
            last.copy_from_slice(&message[message.len() - 16..]);
            full_blocks = message.len() / 16 - 1;
            subkey = &k1;
        } else {
            let tail = &message[message.len() - message.len() % 16..];
            last[..tail.len()].copy_from_slice(tail);
            last[tail.len()] = 0x80;
            full_blocks = message.len() / 16;
            subkey = &k2;
        }
        for i in 0..16 {
            last[i] ^= subkey[i];
        }

        // CBC chain from a zero IV
        let mut state = [0u8; 16];
        for block in message[..full_blocks * 16].chunks(16) {
            for i in 0..16 {
                state[i] ^= block[i];
            }
            state = AesOperations::encrypt_block(key, &state)?;
        }
        for i in 0..16 {
            state[i] ^= last[i];
        }
        AesOperations::encrypt_block(key, &state)
    }

    /// Compute the truncated tag: the leftmost 8 bytes of the full CMAC.
    pub fn mac_truncated(key: &[u8], message: &[u8]) -> Result<[u8; 8], CryptoError> {
        let full = Self::mac(key, message)?;
        let mut truncated = [0u8; 8];
        truncated.copy_from_slice(&full[..Self::TRUNCATED_TAG_SIZE]);
        Ok(truncated)
    }

    /// Verify a tag in constant time. Accepts a full tag or a leftmost
    /// truncation of at least 8 bytes; anything else fails.
    pub fn verify(key: &[u8], message: &[u8], tag: &[u8]) -> Result<bool, CryptoError> {
        if tag.len() < Self::TRUNCATED_TAG_SIZE || tag.len() > Self::TAG_SIZE {
            return Ok(false);
        }
        let computed = Self::mac(key, message)?;
        Ok(bytes::ct_eq(&computed[..tag.len()], tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // NIST SP 800-38B / RFC 4493 test key
    const TEST_KEY: [u8; 16] = hex!("2B7E151628AED2A6ABF7158809CF4F3C");
    const TEST_MSG: [u8; 64] = hex!(
        "6BC1BEE22E409F96E93D7E117393172A"
        "AE2D8A571E03AC9C9EB76FAC45AF8E51"
        "30C81C46A35CE411E5FBC1191A0A52EF"
        "F69F2445DF4F9B17AD2B417BE66C3710"
    );

    #[test]
    fn test_empty_message_vector() {
        let tag = CmacOperations::mac(&TEST_KEY, &[]).unwrap();
        assert_eq!(tag, hex!("BB1D6929E95937287FA37D129B756746"));
    }

    #[test]
    fn test_one_block_vector() {
        let tag = CmacOperations::mac(&TEST_KEY, &TEST_MSG[..16]).unwrap();
        assert_eq!(tag, hex!("070A16B46B4D4144F79BDD9DD04A287C"));
    }

    #[test]
    fn test_partial_final_block_vector() {
        // 40 bytes: two full blocks plus a padded half block
        let tag = CmacOperations::mac(&TEST_KEY, &TEST_MSG[..40]).unwrap();
        assert_eq!(tag, hex!("DFA66747DE9AE63030CA32611497C827"));
    }

    #[test]
    fn test_four_block_vector() {
        let tag = CmacOperations::mac(&TEST_KEY, &TEST_MSG).unwrap();
        assert_eq!(tag, hex!("51F0BEBF7E3B9D92FC49741779363CFE"));
    }

    #[test]
    fn test_matches_cmac_crate() {
        use cmac::{Cmac, Mac};
        for len in [0usize, 1, 15, 16, 17, 32, 40, 63, 64] {
            let mut reference = <Cmac<aes::Aes128> as Mac>::new_from_slice(&TEST_KEY).unwrap();
            reference.update(&TEST_MSG[..len]);
            let expected: [u8; 16] = reference.finalize().into_bytes().into();
            let ours = CmacOperations::mac(&TEST_KEY, &TEST_MSG[..len]).unwrap();
            assert_eq!(ours, expected, "divergence at message length {}", len);
        }
    }

    #[test]
    fn test_truncation_is_leftmost() {
        let full = CmacOperations::mac(&TEST_KEY, &TEST_MSG[..16]).unwrap();
        let short = CmacOperations::mac_truncated(&TEST_KEY, &TEST_MSG[..16]).unwrap();
        assert_eq!(&full[..8], &short);
    }

    #[test]
    fn test_verify_accepts_valid_tags() {
        let full = CmacOperations::mac(&TEST_KEY, b"hello").unwrap();
        assert!(CmacOperations::verify(&TEST_KEY, b"hello", &full).unwrap());
        assert!(CmacOperations::verify(&TEST_KEY, b"hello", &full[..8]).unwrap());
    }

    #[test]
    fn test_verify_rejects_any_flipped_bit() {
        let mut tag = CmacOperations::mac(&TEST_KEY, b"hello").unwrap();
        for byte in 0..tag.len() {
            for bit in 0..8 {
                tag[byte] ^= 1 << bit;
                assert!(!CmacOperations::verify(&TEST_KEY, b"hello", &tag).unwrap());
                tag[byte] ^= 1 << bit;
            }
        }
    }

    #[test]
    fn test_verify_rejects_undersized_tag() {
        let full = CmacOperations::mac(&TEST_KEY, b"hello").unwrap();
        assert!(!CmacOperations::verify(&TEST_KEY, b"hello", &full[..4]).unwrap());
        assert!(!CmacOperations::verify(&TEST_KEY, b"hello", &[]).unwrap());
    }

    #[test]
    fn test_rejects_wrong_key_length() {
        let result = CmacOperations::mac(&[0u8; 8], b"msg");
        assert!(matches!(result, Err(CryptoError::InvalidKeyLength { .. })));
    }
}
