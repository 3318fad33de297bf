//! Transport adapter surface
//!
//! The OS contactless front end (an HCE service registered under the NDEF
//! AID, service category "other") delivers command APDUs one at a time and
//! carries the responses back to the reader. The core only sees this
//! narrow surface: a handler invoked per command, plus a deactivation
//! signal when the reader field is lost.
//!
//! [`LoopbackTransport`] is the in-process implementation used by tests
//! and by hosts that already own an APDU byte stream.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::tag::emulator::TagEmulator;
use crate::tag::storage::ConfigStore;

/// Receives command APDUs from a transport.
pub trait ApduHandler: Send {
    /// Process one command APDU, returning the complete response APDU.
    fn handle_apdu(&mut self, command: &[u8]) -> Vec<u8>;

    /// The reader field was lost or the link dropped; per-session state
    /// must not survive into the next activation.
    fn deactivated(&mut self);
}

impl<S: ConfigStore + Send> ApduHandler for TagEmulator<S> {
    fn handle_apdu(&mut self, command: &[u8]) -> Vec<u8> {
        self.process_apdu(command)
    }

    fn deactivated(&mut self) {
        self.reset_session();
    }
}

/// Shared, serialized handler handle. The mutex spans a whole command
/// round trip, so counter commit and response construction are atomic
/// with respect to concurrent deliveries.
pub type SharedHandler = Arc<Mutex<dyn ApduHandler>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("emulation is already enabled")]
    AlreadyEnabled,

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// A card-emulation transport owned by the composition root.
pub trait Transport {
    /// Begin emulation: subsequent reader commands are delivered to the
    /// handler.
    fn enable(&mut self, handler: SharedHandler) -> Result<(), TransportError>;

    /// Stop emulation and drop the handler.
    fn disable(&mut self);

    fn is_enabled(&self) -> bool;
}

/// In-process transport: commands are exchanged by direct call.
#[derive(Default)]
pub struct LoopbackTransport {
    handler: Option<SharedHandler>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one command APDU, as the OS would on a reader exchange.
    /// Returns `None` while emulation is disabled.
    pub fn exchange(&self, command: &[u8]) -> Option<Vec<u8>> {
        let handler = self.handler.as_ref()?;
        Some(handler.lock().handle_apdu(command))
    }

    /// Simulate the reader field dropping mid-session.
    pub fn field_lost(&self) {
        if let Some(handler) = &self.handler {
            handler.lock().deactivated();
        }
    }
}

impl Transport for LoopbackTransport {
    fn enable(&mut self, handler: SharedHandler) -> Result<(), TransportError> {
        if self.handler.is_some() {
            return Err(TransportError::AlreadyEnabled);
        }
        self.handler = Some(handler);
        Ok(())
    }

    fn disable(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.lock().deactivated();
        }
    }

    fn is_enabled(&self) -> bool {
        self.handler.is_some()
    }
}
