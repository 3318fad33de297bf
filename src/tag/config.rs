//! Card configuration record
//!
//! One record per card: the three master keys, the UID, the withdraw-URL
//! pieces and the tap counter. On disk the byte fields are 32- and
//! 14-character uppercase hex strings.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::ndef::NdefError;
use crate::sdm::{SdmBuilder, SdmError, UID_LEN};

/// Master key length in bytes
pub const KEY_LEN: usize = 16;

/// NXP manufacturer byte: first byte of every UID
pub const UID_MANUFACTURER_BYTE: u8 = 0x04;

/// Largest 24-bit counter value
pub const COUNTER_MAX: u32 = 0x00FF_FFFF;

/// Serde adapters for fixed-width byte arrays stored as uppercase hex
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} hex-encoded bytes", N)))
    }
}

/// Complete card configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardConfig {
    /// Master/authentication key; stored but unused by the read-only mode
    #[serde(with = "hex_bytes")]
    pub k0: [u8; KEY_LEN],
    /// SDM encryption master key (SDMMetaReadKey)
    #[serde(with = "hex_bytes")]
    pub k1: [u8; KEY_LEN],
    /// SDM MAC master key (SDMFileReadKey)
    #[serde(with = "hex_bytes")]
    pub k2: [u8; KEY_LEN],
    /// 7-byte UID, first byte 0x04
    #[serde(with = "hex_bytes")]
    pub uid: [u8; UID_LEN],
    /// Path segment identifying the card at the withdraw server
    pub card_id: String,
    /// Base URL of the withdraw server
    pub lnurl_base: String,
    /// 24-bit tap counter
    pub counter: u32,
    /// Whether emulation may be enabled
    pub enabled: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("UID must start with the manufacturer byte 0x04, got {0:#04X}")]
    BadUidPrefix(u8),

    #[error("counter {0:#08X} exceeds the 24-bit range")]
    CounterOutOfRange(u32),

    #[error("card id is empty")]
    EmptyCardId,

    #[error("card id contains a character unsafe for a URL path: {0:?}")]
    UnsafeCardId(char),

    #[error("LNURL base is not an http(s) URL: {0}")]
    BadBaseUrl(String),

    #[error("generated NDEF message does not fit a short TLV: {0}")]
    NdefTooLong(#[from] NdefError),

    #[error("key material rejected: {0}")]
    BadKeyMaterial(#[from] CryptoError),
}

impl CardConfig {
    /// Create a configuration with fresh random keys and UID.
    pub fn generate(card_id: impl Into<String>, lnurl_base: impl Into<String>) -> Self {
        let mut k0 = [0u8; KEY_LEN];
        let mut k1 = [0u8; KEY_LEN];
        let mut k2 = [0u8; KEY_LEN];
        let mut uid = [0u8; UID_LEN];
        OsRng.fill_bytes(&mut k0);
        OsRng.fill_bytes(&mut k1);
        OsRng.fill_bytes(&mut k2);
        OsRng.fill_bytes(&mut uid);
        uid[0] = UID_MANUFACTURER_BYTE;

        Self {
            k0,
            k1,
            k2,
            uid,
            card_id: card_id.into(),
            lnurl_base: lnurl_base.into(),
            counter: 0,
            enabled: true,
        }
    }

    /// Check every constraint that would make emulation misbehave.
    ///
    /// Violations are surfaced to the configuration caller; the reader
    /// never sees them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uid[0] != UID_MANUFACTURER_BYTE {
            return Err(ConfigError::BadUidPrefix(self.uid[0]));
        }
        if self.counter > COUNTER_MAX {
            return Err(ConfigError::CounterOutOfRange(self.counter));
        }
        if self.card_id.is_empty() {
            return Err(ConfigError::EmptyCardId);
        }
        if let Some(bad) = self
            .card_id
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.' | '~'))
        {
            return Err(ConfigError::UnsafeCardId(bad));
        }
        if !self.lnurl_base.starts_with("https://") && !self.lnurl_base.starts_with("http://") {
            return Err(ConfigError::BadBaseUrl(self.lnurl_base.clone()));
        }

        // Probe with the widest counter: the NDEF length must hold for
        // every value the counter can ever take.
        match self.sdm_builder().ndef_message(COUNTER_MAX) {
            Ok(_) => Ok(()),
            Err(SdmError::Ndef(e)) => Err(ConfigError::NdefTooLong(e)),
            Err(SdmError::Crypto(e)) => Err(ConfigError::BadKeyMaterial(e)),
            Err(SdmError::MacMismatch) => unreachable!("builder never verifies"),
        }
    }

    /// Builder for this card's dynamic messages.
    pub fn sdm_builder(&self) -> SdmBuilder {
        SdmBuilder::new(
            self.uid,
            self.k1,
            self.k2,
            self.lnurl_base.clone(),
            self.card_id.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> CardConfig {
        CardConfig {
            k0: [0u8; 16],
            k1: [0u8; 16],
            k2: [0u8; 16],
            uid: [0x04, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
            card_id: "card-1".to_string(),
            lnurl_base: "https://boltcard.example.com/ln".to_string(),
            counter: 0,
            enabled: true,
        }
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = valid_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CardConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_byte_fields_serialize_as_uppercase_hex() {
        let mut config = valid_config();
        config.k1 = [0xAB; 16];
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(&"AB".repeat(16)));
        assert!(json.contains("04AABBCCDDEEFF"));
    }

    #[test]
    fn test_rejects_wrong_length_hex() {
        let mut json: serde_json::Value =
            serde_json::to_value(valid_config()).unwrap();
        json["uid"] = serde_json::Value::String("04AABB".to_string());
        assert!(serde_json::from_value::<CardConfig>(json).is_err());
    }

    #[test]
    fn test_generate_produces_valid_config() {
        let config = CardConfig::generate("card-xyz", "https://pay.example.com");
        assert_eq!(config.uid[0], 0x04);
        assert_eq!(config.counter, 0);
        assert!(config.validate().is_ok());

        // keys are actually random
        let other = CardConfig::generate("card-xyz", "https://pay.example.com");
        assert_ne!(config.k1, other.k1);
        assert_ne!(config.uid, other.uid);
    }

    #[test]
    fn test_validate_uid_prefix() {
        let mut config = valid_config();
        config.uid[0] = 0x08;
        assert_eq!(config.validate(), Err(ConfigError::BadUidPrefix(0x08)));
    }

    #[test]
    fn test_validate_counter_range() {
        let mut config = valid_config();
        config.counter = 0x0100_0000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CounterOutOfRange(_))
        ));
    }

    #[test]
    fn test_validate_card_id() {
        let mut config = valid_config();
        config.card_id = String::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyCardId));

        config.card_id = "a/b".to_string();
        assert_eq!(config.validate(), Err(ConfigError::UnsafeCardId('/')));
    }

    #[test]
    fn test_validate_base_url() {
        let mut config = valid_config();
        config.lnurl_base = "ftp://x".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::BadBaseUrl(_))));
    }

    #[test]
    fn test_validate_catches_overlong_ndef() {
        let mut config = valid_config();
        config.card_id = "x".repeat(250);
        assert!(matches!(config.validate(), Err(ConfigError::NdefTooLong(_))));
    }
}
