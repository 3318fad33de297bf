//! Configuration persistence
//!
//! The state machine only depends on the [`ConfigStore`] trait; the JSON
//! file store is the default backend and the memory store serves tests
//! and embedders without a filesystem.
//!
//! The counter commit is the one persistence operation on the hot path:
//! it must make the new value durable before the response leaves the tag,
//! and it must leave the in-memory counter untouched when the write fails.

use std::fs;
use std::path::PathBuf;

use log::{debug, info, warn};
use thiserror::Error;

use super::config::{CardConfig, COUNTER_MAX};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no card configured")]
    NotConfigured,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt configuration: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("persistence rejected the write")]
    WriteRejected,
}

/// Persistence surface consumed by the state machine.
pub trait ConfigStore {
    /// Load the stored configuration, `None` when no card is configured.
    fn load(&mut self) -> Result<Option<CardConfig>, StorageError>;

    /// Persist a full configuration.
    fn save(&mut self, config: &CardConfig) -> Result<(), StorageError>;

    /// Atomically increment the tap counter (wrapping at 24 bits),
    /// persist it, and return the new value. The stored counter is
    /// unchanged when this fails.
    fn increment_counter(&mut self) -> Result<u32, StorageError>;

    /// Overwrite the counter (masked to 24 bits) and persist.
    fn set_counter(&mut self, value: u32) -> Result<(), StorageError>;
}

/// JSON file store
pub struct JsonConfigStore {
    storage_dir: PathBuf,
    config_file: PathBuf,
    config: Option<CardConfig>,
}

impl JsonConfigStore {
    const CONFIG_FILE: &'static str = "card_config.json";

    /// Get the default storage directory
    fn default_storage_dir() -> PathBuf {
        if let Ok(path) = std::env::var("BOLTCARD_EMU_DIR") {
            return PathBuf::from(path);
        }
        if let Some(home) = dirs::home_dir() {
            return home.join(".boltcard-emu");
        }
        PathBuf::from("/var/lib/boltcard-emu")
    }

    /// Create a store rooted at `storage_path`, or at the default
    /// directory when `None`.
    pub fn new(storage_path: Option<PathBuf>) -> Self {
        let storage_dir = storage_path.unwrap_or_else(Self::default_storage_dir);
        let config_file = storage_dir.join(Self::CONFIG_FILE);
        Self {
            storage_dir,
            config_file,
            config: None,
        }
    }

    fn write_config(&self, config: &CardConfig) -> Result<(), StorageError> {
        fs::create_dir_all(&self.storage_dir)?;
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_file, json)?;
        debug!("saved card configuration to {:?}", self.config_file);
        Ok(())
    }

    /// Remove the stored configuration (factory reset).
    pub fn reset(&mut self) -> Result<(), StorageError> {
        if self.config_file.exists() {
            fs::remove_file(&self.config_file)?;
        }
        self.config = None;
        info!("card configuration reset");
        Ok(())
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&mut self) -> Result<Option<CardConfig>, StorageError> {
        if !self.config_file.exists() {
            debug!("no card configuration at {:?}", self.config_file);
            self.config = None;
            return Ok(None);
        }
        let content = fs::read_to_string(&self.config_file)?;
        match serde_json::from_str::<CardConfig>(&content) {
            Ok(config) => {
                info!("loaded card configuration from {:?}", self.config_file);
                self.config = Some(config.clone());
                Ok(Some(config))
            }
            Err(e) => {
                warn!("failed to parse card configuration: {}", e);
                Err(e.into())
            }
        }
    }

    fn save(&mut self, config: &CardConfig) -> Result<(), StorageError> {
        self.write_config(config)?;
        self.config = Some(config.clone());
        Ok(())
    }

    fn increment_counter(&mut self) -> Result<u32, StorageError> {
        let mut config = self.config.clone().ok_or(StorageError::NotConfigured)?;
        config.counter = (config.counter + 1) & COUNTER_MAX;
        // durability first: memory only changes once the write succeeded
        self.write_config(&config)?;
        let counter = config.counter;
        self.config = Some(config);
        debug!("counter committed: {:06X}", counter);
        Ok(counter)
    }

    fn set_counter(&mut self, value: u32) -> Result<(), StorageError> {
        let mut config = self.config.clone().ok_or(StorageError::NotConfigured)?;
        config.counter = value & COUNTER_MAX;
        self.write_config(&config)?;
        self.config = Some(config);
        Ok(())
    }
}

/// In-memory store with write-failure injection.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    config: Option<CardConfig>,
    /// When set, every write fails with [`StorageError::WriteRejected`].
    pub fail_writes: bool,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CardConfig) -> Self {
        Self {
            config: Some(config),
            fail_writes: false,
        }
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes {
            Err(StorageError::WriteRejected)
        } else {
            Ok(())
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&mut self) -> Result<Option<CardConfig>, StorageError> {
        Ok(self.config.clone())
    }

    fn save(&mut self, config: &CardConfig) -> Result<(), StorageError> {
        self.check_writable()?;
        self.config = Some(config.clone());
        Ok(())
    }

    fn increment_counter(&mut self) -> Result<u32, StorageError> {
        self.check_writable()?;
        let config = self.config.as_mut().ok_or(StorageError::NotConfigured)?;
        config.counter = (config.counter + 1) & COUNTER_MAX;
        Ok(config.counter)
    }

    fn set_counter(&mut self, value: u32) -> Result<(), StorageError> {
        self.check_writable()?;
        let config = self.config.as_mut().ok_or(StorageError::NotConfigured)?;
        config.counter = value & COUNTER_MAX;
        Ok(())
    }
}
