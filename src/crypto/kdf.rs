//! Session-key derivation (NIST SP 800-108, counter mode, CMAC PRF)
//!
//! One PRF invocation per derived key: the requested output length equals
//! the CMAC width, so the counter never goes past 1.

use zeroize::Zeroizing;

use super::{AesOperations, CmacOperations, CryptoError};

/// Derivation label for the PICCData encryption session key.
pub const ENC_SESSION_LABEL: &[u8] = b"SDMENCFileData";

/// Derivation label for the response-MAC session key.
pub const MAC_SESSION_LABEL: &[u8] = b"SDMFileReadMAC";

/// Length in bytes of the session vector (the KDF context).
pub const SESSION_VECTOR_LEN: usize = 16;

/// Derive a 128-bit session key from a 128-bit master key.
///
/// The single PRF input block is
/// `0x0001 || label || 0x00 || session_vector || 0x0080`
/// (big-endian iteration counter, ASCII label, separator, 16-byte context,
/// output length in bits). The result is wiped on drop.
pub fn derive_key(
    master_key: &[u8],
    label: &[u8],
    session_vector: &[u8],
) -> Result<Zeroizing<[u8; 16]>, CryptoError> {
    if master_key.len() != AesOperations::KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: AesOperations::KEY_SIZE,
            actual: master_key.len(),
        });
    }
    if session_vector.len() != SESSION_VECTOR_LEN {
        return Err(CryptoError::InvalidContextLength(session_vector.len()));
    }

    let mut input = Vec::with_capacity(2 + label.len() + 1 + SESSION_VECTOR_LEN + 2);
    input.extend_from_slice(&[0x00, 0x01]);
    input.extend_from_slice(label);
    input.push(0x00);
    input.extend_from_slice(session_vector);
    input.extend_from_slice(&[0x00, 0x80]);

    Ok(Zeroizing::new(CmacOperations::mac(master_key, &input)?))
}
