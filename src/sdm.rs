//! Secure Dynamic Messaging builder
//!
//! Assembles the per-read tag response: PICCData (UID and tap counter) is
//! encrypted with a derived session key, authenticated with a truncated
//! CMAC under a second derived key, and the two values are embedded as
//! uppercase-hex query parameters of the withdraw URL, which is then
//! wrapped into the NDEF file content.
//!
//! The decrypt/verify half lives here too so a server holding the same
//! master keys can validate the output.

use thiserror::Error;
use zeroize::Zeroizing;

use crate::bytes;
use crate::crypto::{
    derive_key, AesOperations, CmacOperations, CryptoError, ENC_SESSION_LABEL, MAC_SESSION_LABEL,
};
use crate::ndef::{self, NdefError};

/// UID length in bytes.
pub const UID_LEN: usize = 7;

/// PICCData length: UID (7) followed by the 24-bit counter (3, big-endian).
pub const PICC_DATA_LEN: usize = 10;

/// Session vector for the unauthenticated read mode: all zero.
pub const SESSION_VECTOR: [u8; 16] = [0u8; 16];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdmError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Ndef(#[from] NdefError),

    #[error("truncated MAC verification failed")]
    MacMismatch,
}

/// Assemble PICCData: `UID || counter` with the counter big-endian and
/// masked to 24 bits.
pub fn picc_data(uid: &[u8; UID_LEN], counter: u32) -> [u8; PICC_DATA_LEN] {
    let mut data = [0u8; PICC_DATA_LEN];
    data[..UID_LEN].copy_from_slice(uid);
    data[UID_LEN..].copy_from_slice(&bytes::u24_to_bytes(counter));
    data
}

fn session_enc_key(master: &[u8; 16]) -> Result<Zeroizing<[u8; 16]>, CryptoError> {
    derive_key(master, ENC_SESSION_LABEL, &SESSION_VECTOR)
}

fn session_mac_key(master: &[u8; 16]) -> Result<Zeroizing<[u8; 16]>, CryptoError> {
    derive_key(master, MAC_SESSION_LABEL, &SESSION_VECTOR)
}

/// Encrypt PICCData under the session key derived from the encryption
/// master key (AES-CTR, zero IV).
pub fn encrypt_picc_data(
    enc_master: &[u8; 16],
    picc: &[u8; PICC_DATA_LEN],
) -> Result<[u8; PICC_DATA_LEN], SdmError> {
    let key = session_enc_key(enc_master)?;
    let ct = AesOperations::ctr_transform(&key[..], &[0u8; 16], picc)?;
    let mut out = [0u8; PICC_DATA_LEN];
    out.copy_from_slice(&ct);
    Ok(out)
}

/// Server-side inverse of [`encrypt_picc_data`]: recover `(UID, counter)`.
pub fn decrypt_picc_data(
    enc_master: &[u8; 16],
    ciphertext: &[u8; PICC_DATA_LEN],
) -> Result<([u8; UID_LEN], u32), SdmError> {
    let key = session_enc_key(enc_master)?;
    let pt = AesOperations::ctr_transform(&key[..], &[0u8; 16], ciphertext)?;
    let mut uid = [0u8; UID_LEN];
    uid.copy_from_slice(&pt[..UID_LEN]);
    let mut counter = [0u8; 3];
    counter.copy_from_slice(&pt[UID_LEN..]);
    Ok((uid, bytes::u24_from_bytes(&counter)))
}

/// Truncated CMAC over the *plaintext* PICCData under the session key
/// derived from the MAC master key.
pub fn picc_data_mac(
    mac_master: &[u8; 16],
    picc: &[u8; PICC_DATA_LEN],
) -> Result<[u8; 8], SdmError> {
    let key = session_mac_key(mac_master)?;
    Ok(CmacOperations::mac_truncated(&key[..], picc)?)
}

/// Server-side check of a received truncated MAC (constant time).
pub fn verify_picc_data_mac(
    mac_master: &[u8; 16],
    picc: &[u8; PICC_DATA_LEN],
    mac: &[u8; 8],
) -> Result<(), SdmError> {
    if CmacOperations::verify(&session_mac_key(mac_master)?[..], picc, mac)? {
        Ok(())
    } else {
        Err(SdmError::MacMismatch)
    }
}

/// Builds the dynamic withdraw URL and NDEF content for one card.
///
/// Holds everything that is fixed across reads; only the counter varies
/// per call.
#[derive(Debug, Clone)]
pub struct SdmBuilder {
    uid: [u8; UID_LEN],
    enc_master: [u8; 16],
    mac_master: [u8; 16],
    lnurl_base: String,
    card_id: String,
}

impl SdmBuilder {
    pub fn new(
        uid: [u8; UID_LEN],
        enc_master: [u8; 16],
        mac_master: [u8; 16],
        lnurl_base: impl Into<String>,
        card_id: impl Into<String>,
    ) -> Self {
        Self {
            uid,
            enc_master,
            mac_master,
            lnurl_base: lnurl_base.into(),
            card_id: card_id.into(),
        }
    }

    /// The withdraw URL for one counter value:
    /// `{base}/{card_id}?p={EncPICCData}&c={MAC}`, hex uppercase.
    pub fn url(&self, counter: u32) -> Result<String, SdmError> {
        let picc = picc_data(&self.uid, counter);
        let enc = encrypt_picc_data(&self.enc_master, &picc)?;
        let mac = picc_data_mac(&self.mac_master, &picc)?;

        let base = self
            .lnurl_base
            .strip_suffix('/')
            .unwrap_or(&self.lnurl_base);
        Ok(format!(
            "{}/{}?p={}&c={}",
            base,
            self.card_id,
            hex::encode_upper(enc),
            hex::encode_upper(mac)
        ))
    }

    /// The complete NDEF file content for one counter value.
    pub fn ndef_message(&self, counter: u32) -> Result<Vec<u8>, SdmError> {
        Ok(ndef::uri_message(&self.url(counter)?)?)
    }
}
