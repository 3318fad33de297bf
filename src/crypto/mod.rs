//! Cryptographic Operations
//!
//! AES-128 primitives plus the two constructions built on top of them:
//! AES-CMAC (NIST SP 800-38B) and the counter-mode key-derivation function
//! (NIST SP 800-108) used to derive per-read session keys.

pub mod aes;
pub mod cmac;
pub mod kdf;

pub use self::aes::AesOperations;
pub use self::cmac::CmacOperations;
pub use self::kdf::{derive_key, ENC_SESSION_LABEL, MAC_SESSION_LABEL};

use thiserror::Error;

/// Errors from the crypto layer. These indicate caller bugs (wrong key or
/// IV sizes) rather than runtime conditions; the state machine maps them
/// to a generic error status word and logs a diagnostic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid IV length: expected 16, got {0}")]
    InvalidIvLength(usize),

    #[error("data length {0} is not a multiple of the block size")]
    UnalignedData(usize),

    #[error("invalid derivation context length: expected 16, got {0}")]
    InvalidContextLength(usize),
}
