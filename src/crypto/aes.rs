//! AES-128 Operations
//!
//! Single-block encryption plus ECB and CTR wrappers. ECB never pads; CTR
//! treats the 16-byte IV as a big-endian 128-bit counter incremented per
//! block and is its own inverse.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use super::CryptoError;

/// AES-128 Operations
pub struct AesOperations;

impl AesOperations {
    /// Block size for AES
    pub const BLOCK_SIZE: usize = 16;

    /// Key size for AES-128
    pub const KEY_SIZE: usize = 16;

    fn cipher(key: &[u8]) -> Result<Aes128, CryptoError> {
        if key.len() != Self::KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: Self::KEY_SIZE,
                actual: key.len(),
            });
        }
        Ok(Aes128::new(GenericArray::from_slice(key)))
    }

    /// Encrypt a single 16-byte block.
    pub fn encrypt_block(key: &[u8], plaintext: &[u8]) -> Result<[u8; 16], CryptoError> {
        let cipher = Self::cipher(key)?;
        if plaintext.len() != Self::BLOCK_SIZE {
            return Err(CryptoError::UnalignedData(plaintext.len()));
        }
        let mut block = GenericArray::clone_from_slice(plaintext);
        cipher.encrypt_block(&mut block);
        Ok(block.into())
    }

    /// Decrypt a single 16-byte block.
    pub fn decrypt_block(key: &[u8], ciphertext: &[u8]) -> Result<[u8; 16], CryptoError> {
        let cipher = Self::cipher(key)?;
        if ciphertext.len() != Self::BLOCK_SIZE {
            return Err(CryptoError::UnalignedData(ciphertext.len()));
        }
        let mut block = GenericArray::clone_from_slice(ciphertext);
        cipher.decrypt_block(&mut block);
        Ok(block.into())
    }

    /// Encrypt whole blocks with AES-ECB. The data length must be a
    /// multiple of 16; no padding is applied here.
    pub fn encrypt_ecb(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Self::cipher(key)?;
        if plaintext.len() % Self::BLOCK_SIZE != 0 {
            return Err(CryptoError::UnalignedData(plaintext.len()));
        }
        let mut result = Vec::with_capacity(plaintext.len());
        for chunk in plaintext.chunks(Self::BLOCK_SIZE) {
            let mut block = GenericArray::clone_from_slice(chunk);
            cipher.encrypt_block(&mut block);
            result.extend_from_slice(&block);
        }
        Ok(result)
    }

    /// Decrypt whole blocks with AES-ECB.
    pub fn decrypt_ecb(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Self::cipher(key)?;
        if ciphertext.len() % Self::BLOCK_SIZE != 0 {
            return Err(CryptoError::UnalignedData(ciphertext.len()));
        }
        let mut result = Vec::with_capacity(ciphertext.len());
        for chunk in ciphertext.chunks(Self::BLOCK_SIZE) {
            let mut block = GenericArray::clone_from_slice(chunk);
            cipher.decrypt_block(&mut block);
            result.extend_from_slice(&block);
        }
        Ok(result)
    }

    /// Encrypt or decrypt arbitrary-length data with AES-CTR.
    ///
    /// The IV is interpreted as a big-endian 128-bit counter, incremented
    /// once per block (wrapping); the final keystream block is truncated to
    /// the data length. Applying the same call twice restores the input.
    pub fn ctr_transform(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Self::cipher(key)?;
        let iv_block: [u8; 16] = iv
            .try_into()
            .map_err(|_| CryptoError::InvalidIvLength(iv.len()))?;

        let mut counter = u128::from_be_bytes(iv_block);
        let mut result = Vec::with_capacity(data.len());
        for chunk in data.chunks(Self::BLOCK_SIZE) {
            let mut keystream = GenericArray::clone_from_slice(&counter.to_be_bytes());
            cipher.encrypt_block(&mut keystream);
            for (byte, ks) in chunk.iter().zip(keystream.iter()) {
                result.push(byte ^ ks);
            }
            counter = counter.wrapping_add(1);
        }
        Ok(result)
    }
}
