//! The emulated tag: configuration record, persistence, and the Type 4
//! Tag state machine that answers reader commands.

pub mod config;
pub mod emulator;
pub mod storage;

pub use config::{CardConfig, ConfigError};
pub use emulator::{EmulatorError, FileId, TagEmulator};
pub use storage::{ConfigStore, JsonConfigStore, MemoryConfigStore, StorageError};
