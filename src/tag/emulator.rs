//! Type 4 Tag state machine
//!
//! Dispatches SELECT and READ BINARY the way an NTAG424 in SDM read-only
//! mode does, owns the tap counter, and regenerates the NDEF file content
//! on demand. Every outcome, including internal failures, leaves the
//! handler as a well-formed response APDU.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

use crate::apdu::{ins, parse_apdu, Response, APDU, SW};
use crate::tag::config::{CardConfig, ConfigError};
use crate::tag::storage::{ConfigStore, StorageError};

/// NDEF Type 4 Tag application AID
pub const NDEF_APP_AID: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];

/// Capability Container file content: NDEF v4.0, 64-byte max read,
/// free read, free write.
pub const CAPABILITY_CONTAINER: [u8; 6] = [0xE1, 0x40, 0x00, 0x40, 0x00, 0x00];

/// Default idle timeout after which cached NDEF content goes stale.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(2);

/// The closed set of elementary files a reader can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileId {
    CapabilityContainer,
    Ndef,
    Proprietary,
}

impl FileId {
    /// Decode the data field of a SELECT-by-file-id command: a bare id
    /// byte or a zero-prefixed two-byte id.
    pub fn from_select_data(data: &[u8]) -> Option<Self> {
        let id = match data {
            [id] => *id,
            [0x00, id] => *id,
            _ => return None,
        };
        match id {
            0x01 => Some(FileId::CapabilityContainer),
            0x02 => Some(FileId::Ndef),
            0x03 => Some(FileId::Proprietary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Idle,
    AppSelected,
    FileSelected(FileId),
}

/// NDEF bytes generated for one read session. Fragmented follow-up reads
/// are served from here so they all see the same counter value.
struct CachedNdef {
    bytes: Vec<u8>,
    last_used: Instant,
}

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("no card configured")]
    NotConfigured,

    #[error("card is disabled")]
    Disabled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The emulated tag.
///
/// One instance per card; commands are processed to completion one at a
/// time. The caller (transport) is responsible for serializing access.
pub struct TagEmulator<S> {
    store: S,
    config: CardConfig,
    selection: Selection,
    ndef_cache: Option<CachedNdef>,
    cache_timeout: Duration,
    counter_listener: Option<Box<dyn FnMut(u32) + Send>>,
}

impl<S: ConfigStore> TagEmulator<S> {
    /// Build an emulator from a configured store.
    ///
    /// Fails when no card is configured, the card is disabled, or the
    /// configuration is invalid; these surface to the configuration
    /// caller and never reach a reader.
    pub fn new(mut store: S) -> Result<Self, EmulatorError> {
        let config = store.load()?.ok_or(EmulatorError::NotConfigured)?;
        config.validate()?;
        if !config.enabled {
            return Err(EmulatorError::Disabled);
        }
        info!("tag emulation ready, card id {}", config.card_id);
        Ok(Self {
            store,
            config,
            selection: Selection::Idle,
            ndef_cache: None,
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            counter_listener: None,
        })
    }

    /// Override the NDEF cache idle timeout.
    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    /// Register an observer for committed counter values.
    pub fn set_counter_listener(&mut self, listener: impl FnMut(u32) + Send + 'static) {
        self.counter_listener = Some(Box::new(listener));
    }

    /// The last committed counter value.
    pub fn counter(&self) -> u32 {
        self.config.counter
    }

    /// Access the backing store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Drop all per-session state: selection and cached NDEF content.
    /// The stored counter is untouched.
    pub fn reset_session(&mut self) {
        debug!("session reset");
        self.selection = Selection::Idle;
        self.ndef_cache = None;
    }

    /// Process one command APDU and produce the raw response bytes.
    pub fn process_apdu(&mut self, raw: &[u8]) -> Vec<u8> {
        let response = match parse_apdu(raw) {
            Ok(apdu) => self.dispatch(&apdu),
            Err(e) => {
                warn!("unparseable APDU ({} bytes): {}", raw.len(), e);
                Response::error(SW::UNKNOWN_ERROR)
            }
        };
        response.to_bytes()
    }

    fn dispatch(&mut self, cmd: &APDU) -> Response {
        debug!(
            "APDU: CLA={:02X} INS={:02X} P1={:02X} P2={:02X} Lc={}",
            cmd.cla,
            cmd.ins,
            cmd.p1,
            cmd.p2,
            cmd.data.len()
        );

        if cmd.cla != 0x00 {
            return Response::error(SW::CLA_NOT_SUPPORTED);
        }

        match cmd.ins {
            ins::SELECT => self.handle_select(cmd),
            ins::READ_BINARY => self.handle_read_binary(cmd),
            _ => {
                debug!("unsupported instruction {:02X}", cmd.ins);
                Response::error(SW::INS_NOT_SUPPORTED)
            }
        }
    }

    fn handle_select(&mut self, cmd: &APDU) -> Response {
        match (cmd.p1, cmd.p2) {
            // SELECT by DF name
            (0x04, 0x00) => {
                if cmd.data == NDEF_APP_AID {
                    self.selection = Selection::AppSelected;
                    self.ndef_cache = None;
                    info!("NDEF application selected");
                    Response::ok()
                } else {
                    debug!("unknown AID {:02X?}", cmd.data);
                    Response::error(SW::FILE_NOT_FOUND)
                }
            }
            // SELECT by file id
            (0x00, 0x00) => match FileId::from_select_data(&cmd.data) {
                Some(file) => {
                    self.selection = Selection::FileSelected(file);
                    self.ndef_cache = None;
                    debug!("file selected: {:?}", file);
                    Response::ok()
                }
                None => {
                    debug!("unknown file id {:02X?}", cmd.data);
                    Response::error(SW::FILE_NOT_FOUND)
                }
            },
            _ => Response::error(SW::INCORRECT_P1_P2),
        }
    }

    fn handle_read_binary(&mut self, cmd: &APDU) -> Response {
        let file = match self.selection {
            Selection::FileSelected(file) => file,
            _ => return Response::error(SW::SECURITY_STATUS_NOT_SATISFIED),
        };

        let offset = cmd.p1p2() as usize;
        let le = cmd.le.unwrap_or(256) as usize;

        let content = match file {
            FileId::CapabilityContainer => CAPABILITY_CONTAINER.to_vec(),
            FileId::Proprietary => Vec::new(),
            FileId::Ndef => match self.ndef_content(offset) {
                Ok(bytes) => bytes,
                Err(response) => return response,
            },
        };

        if offset >= content.len() {
            return Response::ok();
        }
        let end = content.len().min(offset + le);
        Response::success(content[offset..end].to_vec())
    }

    /// Current NDEF file content for a read at `offset`.
    ///
    /// A fresh cache serves the bytes of the read session in progress. A
    /// read at offset 0 with no usable cache is a new tap: the counter is
    /// committed to persistence before any ciphertext is produced.
    fn ndef_content(&mut self, offset: usize) -> Result<Vec<u8>, Response> {
        if let Some(cache) = &mut self.ndef_cache {
            if cache.last_used.elapsed() < self.cache_timeout {
                cache.last_used = Instant::now();
                return Ok(cache.bytes.clone());
            }
        }
        self.ndef_cache = None;

        if offset != 0 {
            // a fragmented read whose session expired; re-reading from the
            // start is the only way to get consistent bytes
            return Err(Response::error(SW::CONDITIONS_NOT_SATISFIED));
        }

        let counter = match self.store.increment_counter() {
            Ok(counter) => counter,
            Err(e) => {
                warn!("counter commit failed: {}", e);
                return Err(Response::error(SW::UNKNOWN_ERROR));
            }
        };
        self.config.counter = counter;
        if let Some(listener) = &mut self.counter_listener {
            listener(counter);
        }

        let bytes = match self.config.sdm_builder().ndef_message(counter) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("NDEF generation failed: {}", e);
                return Err(Response::error(SW::UNKNOWN_ERROR));
            }
        };
        info!("NDEF regenerated, counter {:06X}", counter);

        self.ndef_cache = Some(CachedNdef {
            bytes: bytes.clone(),
            last_used: Instant::now(),
        });
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::storage::MemoryConfigStore;

    const SELECT_AID: &[u8] = &[
        0x00, 0xA4, 0x04, 0x00, 0x07, 0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01,
    ];
    const SELECT_NDEF: &[u8] = &[0x00, 0xA4, 0x00, 0x00, 0x02, 0x00, 0x02];
    const SELECT_CC: &[u8] = &[0x00, 0xA4, 0x00, 0x00, 0x02, 0x00, 0x01];
    const READ_ALL: &[u8] = &[0x00, 0xB0, 0x00, 0x00, 0xFF];

    fn test_config() -> CardConfig {
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

    fn emulator() -> TagEmulator<MemoryConfigStore> {
        TagEmulator::new(MemoryConfigStore::with_config(test_config())).unwrap()
    }

    fn sw(bytes: &[u8]) -> u16 {
        let n = bytes.len();
        ((bytes[n - 2] as u16) << 8) | (bytes[n - 1] as u16)
    }

    #[test]
    fn test_requires_configuration() {
        assert!(matches!(
            TagEmulator::new(MemoryConfigStore::new()),
            Err(EmulatorError::NotConfigured)
        ));
    }

    #[test]
    fn test_requires_enabled_flag() {
        let mut config = test_config();
        config.enabled = false;
        assert!(matches!(
            TagEmulator::new(MemoryConfigStore::with_config(config)),
            Err(EmulatorError::Disabled)
        ));
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        let mut config = test_config();
        config.uid[0] = 0x00;
        assert!(matches!(
            TagEmulator::new(MemoryConfigStore::with_config(config)),
            Err(EmulatorError::Config(_))
        ));
    }

    #[test]
    fn test_select_aid() {
        let mut emu = emulator();
        assert_eq!(emu.process_apdu(SELECT_AID), vec![0x90, 0x00]);
    }

    #[test]
    fn test_select_unknown_aid_leaves_state() {
        let mut emu = emulator();
        let wrong = &[
            0x00, 0xA4, 0x04, 0x00, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(sw(&emu.process_apdu(wrong)), 0x6A82);
        // still Idle: reads are refused
        assert_eq!(sw(&emu.process_apdu(READ_ALL)), 0x6982);
    }

    #[test]
    fn test_read_before_select_is_refused() {
        let mut emu = emulator();
        assert_eq!(sw(&emu.process_apdu(READ_ALL)), 0x6982);
        assert_eq!(emu.counter(), 0);
    }

    #[test]
    fn test_read_capability_container() {
        let mut emu = emulator();
        emu.process_apdu(SELECT_AID);
        assert_eq!(emu.process_apdu(SELECT_CC), vec![0x90, 0x00]);

        let response = emu.process_apdu(READ_ALL);
        assert_eq!(sw(&response), 0x9000);
        assert_eq!(&response[..response.len() - 2], &CAPABILITY_CONTAINER);
        // CC reads never touch the counter
        assert_eq!(emu.counter(), 0);
    }

    #[test]
    fn test_single_byte_file_id_select() {
        let mut emu = emulator();
        emu.process_apdu(SELECT_AID);
        assert_eq!(
            emu.process_apdu(&[0x00, 0xA4, 0x00, 0x00, 0x01, 0x01]),
            vec![0x90, 0x00]
        );
    }

    #[test]
    fn test_select_unknown_file() {
        let mut emu = emulator();
        emu.process_apdu(SELECT_AID);
        assert_eq!(
            sw(&emu.process_apdu(&[0x00, 0xA4, 0x00, 0x00, 0x02, 0x00, 0x09])),
            0x6A82
        );
    }

    #[test]
    fn test_ndef_read_increments_counter() {
        let mut emu = emulator();
        emu.process_apdu(SELECT_AID);
        emu.process_apdu(SELECT_NDEF);

        let response = emu.process_apdu(READ_ALL);
        assert_eq!(sw(&response), 0x9000);
        let body = &response[..response.len() - 2];
        assert_eq!(body[0], 0x03);
        assert_eq!(*body.last().unwrap(), 0xFE);
        assert_eq!(emu.counter(), 1);
    }

    #[test]
    fn test_fragmented_read_sees_one_counter() {
        let mut emu = emulator();
        emu.process_apdu(SELECT_AID);
        emu.process_apdu(SELECT_NDEF);

        let first = emu.process_apdu(&[0x00, 0xB0, 0x00, 0x00, 0x10]);
        assert_eq!(sw(&first), 0x9000);
        let second = emu.process_apdu(&[0x00, 0xB0, 0x00, 0x10, 0xFF]);
        assert_eq!(sw(&second), 0x9000);
        // both fragments came from one generation
        assert_eq!(emu.counter(), 1);

        let full_read = {
            let mut emu2 = emulator();
            emu2.process_apdu(SELECT_AID);
            emu2.process_apdu(SELECT_NDEF);
            emu2.process_apdu(READ_ALL)
        };
        let mut stitched = first[..first.len() - 2].to_vec();
        stitched.extend_from_slice(&second[..second.len() - 2]);
        assert_eq!(stitched, full_read[..full_read.len() - 2]);
    }

    #[test]
    fn test_reselect_regenerates() {
        let mut emu = emulator();
        for expected in 1..=3u32 {
            emu.process_apdu(SELECT_AID);
            emu.process_apdu(SELECT_NDEF);
            assert_eq!(sw(&emu.process_apdu(READ_ALL)), 0x9000);
            assert_eq!(emu.counter(), expected);
        }
    }

    #[test]
    fn test_expired_cache_regenerates_at_offset_zero() {
        let mut emu = emulator().with_cache_timeout(Duration::ZERO);
        emu.process_apdu(SELECT_AID);
        emu.process_apdu(SELECT_NDEF);
        emu.process_apdu(READ_ALL);
        emu.process_apdu(READ_ALL);
        assert_eq!(emu.counter(), 2);
    }

    #[test]
    fn test_expired_cache_refuses_mid_file_read() {
        let mut emu = emulator().with_cache_timeout(Duration::ZERO);
        emu.process_apdu(SELECT_AID);
        emu.process_apdu(SELECT_NDEF);
        emu.process_apdu(READ_ALL);
        assert_eq!(sw(&emu.process_apdu(&[0x00, 0xB0, 0x00, 0x08, 0xFF])), 0x6985);
        // refusal did not touch the counter
        assert_eq!(emu.counter(), 1);
    }

    #[test]
    fn test_read_past_end_is_empty_success() {
        let mut emu = emulator();
        emu.process_apdu(SELECT_AID);
        emu.process_apdu(SELECT_NDEF);
        emu.process_apdu(READ_ALL);
        let response = emu.process_apdu(&[0x00, 0xB0, 0x7F, 0xFF, 0xFF]);
        assert_eq!(response, vec![0x90, 0x00]);
    }

    #[test]
    fn test_le_bounds_the_slice() {
        let mut emu = emulator();
        emu.process_apdu(SELECT_AID);
        emu.process_apdu(SELECT_CC);
        let response = emu.process_apdu(&[0x00, 0xB0, 0x00, 0x00, 0x02]);
        assert_eq!(response, vec![0xE1, 0x40, 0x90, 0x00]);
    }

    #[test]
    fn test_unknown_instruction() {
        let mut emu = emulator();
        assert_eq!(sw(&emu.process_apdu(&[0x00, 0xCA, 0x00, 0x00])), 0x6D00);
    }

    #[test]
    fn test_unknown_class() {
        let mut emu = emulator();
        assert_eq!(sw(&emu.process_apdu(&[0x80, 0xA4, 0x04, 0x00])), 0x6E00);
    }

    #[test]
    fn test_malformed_apdu() {
        let mut emu = emulator();
        assert_eq!(sw(&emu.process_apdu(&[0x00, 0xA4])), 0x6F00);
    }

    #[test]
    fn test_persistence_failure_rolls_back() {
        let mut emu = emulator();
        emu.process_apdu(SELECT_AID);
        emu.process_apdu(SELECT_NDEF);

        emu.store_mut().fail_writes = true;
        let response = emu.process_apdu(READ_ALL);
        assert_eq!(response, vec![0x6F, 0x00]);
        assert_eq!(emu.counter(), 0);

        emu.store_mut().fail_writes = false;
        emu.process_apdu(SELECT_NDEF);
        assert_eq!(sw(&emu.process_apdu(READ_ALL)), 0x9000);
        assert_eq!(emu.counter(), 1);
    }

    #[test]
    fn test_session_reset_clears_cache_not_counter() {
        let mut emu = emulator();
        emu.process_apdu(SELECT_AID);
        emu.process_apdu(SELECT_NDEF);
        emu.process_apdu(READ_ALL);
        assert_eq!(emu.counter(), 1);

        emu.reset_session();
        assert_eq!(emu.counter(), 1);
        assert_eq!(sw(&emu.process_apdu(READ_ALL)), 0x6982);
    }

    #[test]
    fn test_counter_listener_fires_per_commit() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let seen = Arc::new(AtomicU32::new(0));
        let mut emu = emulator();
        let seen2 = Arc::clone(&seen);
        emu.set_counter_listener(move |counter| {
            seen2.store(counter, Ordering::SeqCst);
        });

        emu.process_apdu(SELECT_AID);
        emu.process_apdu(SELECT_NDEF);
        emu.process_apdu(READ_ALL);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
