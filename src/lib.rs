//! Virtual NTAG424 DNA tag in Secure Dynamic Messaging read-only mode
//!
//! Emulates the contactless behavior a Bolt Card reader expects: each tap
//! answers the NFC Forum Type 4 Tag command set (SELECT by DF name,
//! SELECT by file id, READ BINARY) and serves an NDEF file whose URL
//! embeds an AES-CTR-encrypted (UID, tap counter) pair and a truncated
//! AES-CMAC over the same plaintext. A withdraw server holding the two
//! master keys decrypts and verifies these to authorize a Lightning
//! payment.
//!
//! The crate is transport- and storage-agnostic: hosts plug in a
//! [`Transport`] (the OS card-emulation facility) and a
//! [`ConfigStore`] (key, URL and counter persistence), and hand commands
//! to a [`TagEmulator`].
//!
//! # Example
//! ```ignore
//! use boltcard_emu::{CardConfig, JsonConfigStore, TagEmulator, ConfigStore};
//!
//! let mut store = JsonConfigStore::new(None);
//! store.save(&CardConfig::generate("card-1", "https://pay.example.com/ln"))?;
//!
//! let mut tag = TagEmulator::new(store)?;
//! let response = tag.process_apdu(&[0x00, 0xA4, 0x04, 0x00, 0x07,
//!                                   0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01]);
//! assert_eq!(response, [0x90, 0x00]);
//! ```

pub mod apdu;
pub mod bytes;
pub mod crypto;
pub mod ndef;
pub mod sdm;
pub mod tag;
pub mod transport;

pub use apdu::{Response, APDU, SW};
pub use sdm::SdmBuilder;
pub use tag::config::{CardConfig, ConfigError};
pub use tag::emulator::{EmulatorError, FileId, TagEmulator};
pub use tag::storage::{ConfigStore, JsonConfigStore, MemoryConfigStore, StorageError};
pub use transport::{ApduHandler, LoopbackTransport, SharedHandler, Transport, TransportError};
