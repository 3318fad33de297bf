//! NDEF encoding
//!
//! Builds the Type 4 Tag NDEF file content: a single short-form well-known
//! URI record wrapped in an NDEF-Message TLV. Only the one-byte TLV length
//! form is emitted; a message that would need the 3-byte form is rejected
//! so the caller can surface a configuration error instead.

use thiserror::Error;

/// NDEF-Message TLV tag
pub const NDEF_MESSAGE_TLV: u8 = 0x03;

/// Terminator TLV
pub const TERMINATOR_TLV: u8 = 0xFE;

/// Record header: MB=1, ME=1, SR=1, TNF=well-known
const URI_RECORD_HEADER: u8 = 0xD1;

/// Record type "U" (URI)
const URI_RECORD_TYPE: u8 = 0x55;

/// URI identifier code for the `https://` prefix
const URI_ID_HTTPS: u8 = 0x04;

/// URI identifier code for an unabbreviated URI
const URI_ID_NONE: u8 = 0x00;

/// Largest record that still fits a one-byte TLV length (0xFF introduces
/// the 3-byte form).
const MAX_SHORT_TLV_LEN: usize = 254;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NdefError {
    #[error("URI record payload of {0} bytes exceeds the short-record limit of 255")]
    PayloadTooLong(usize),

    #[error("NDEF message of {0} bytes exceeds the one-byte TLV limit of 254")]
    MessageTooLong(usize),
}

/// Encode a URL as a short-form well-known URI record.
///
/// `https://` is abbreviated with its URI identifier code; any other URL
/// is carried verbatim under the empty identifier.
pub fn uri_record(url: &str) -> Result<Vec<u8>, NdefError> {
    let (identifier, rest) = match url.strip_prefix("https://") {
        Some(rest) => (URI_ID_HTTPS, rest),
        None => (URI_ID_NONE, url),
    };

    let payload_len = 1 + rest.len();
    if payload_len > u8::MAX as usize {
        return Err(NdefError::PayloadTooLong(payload_len));
    }

    let mut record = Vec::with_capacity(4 + payload_len);
    record.push(URI_RECORD_HEADER);
    record.push(0x01); // type length
    record.push(payload_len as u8);
    record.push(URI_RECORD_TYPE);
    record.push(identifier);
    record.extend_from_slice(rest.as_bytes());
    Ok(record)
}

/// Wrap a record into the NDEF file content:
/// `0x03 || len || record || 0xFE`.
pub fn message(record: &[u8]) -> Result<Vec<u8>, NdefError> {
    if record.len() > MAX_SHORT_TLV_LEN {
        return Err(NdefError::MessageTooLong(record.len()));
    }
    let mut out = Vec::with_capacity(record.len() + 3);
    out.push(NDEF_MESSAGE_TLV);
    out.push(record.len() as u8);
    out.extend_from_slice(record);
    out.push(TERMINATOR_TLV);
    Ok(out)
}

/// Convenience wrapper: URL straight to NDEF file content.
pub fn uri_message(url: &str) -> Result<Vec<u8>, NdefError> {
    message(&uri_record(url)?)
}
