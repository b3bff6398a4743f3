//! NFC data responder
//!
//! Amiibo emulation is not implemented. The responder only records what
//! the console asked for so the session loop has somewhere to route
//! `RequestNfcData` frames.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::domain::mcu::McuState;
use crate::infrastructure::bluetooth::report::OutputReport;

/// Receives `RequestNfcData` frames from the session loop
pub trait NfcResponder: Send {
    fn handle_nfc_request(&mut self, mcu: &McuState, report: &OutputReport);
}

/// A shared responder stays readable by its owner while the session runs
impl<R: NfcResponder> NfcResponder for Arc<Mutex<R>> {
    fn handle_nfc_request(&mut self, mcu: &McuState, report: &OutputReport) {
        self.lock().handle_nfc_request(mcu, report);
    }
}

/// Stub responder holding the last NFC request
#[derive(Debug, Default)]
pub struct AmiiboStub {
    requests: u64,
    last_command: Option<u8>,
}

impl AmiiboStub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn last_command(&self) -> Option<u8> {
        self.last_command
    }
}

impl NfcResponder for AmiiboStub {
    fn handle_nfc_request(&mut self, mcu: &McuState, report: &OutputReport) {
        self.requests += 1;
        self.last_command = Some(report.mcu_command_byte());
        debug!(
            "NFC data request 0x{:02X} ignored (MCU {:?}/{:?})",
            report.mcu_command_byte(),
            mcu.mode(),
            mcu.power()
        );
    }
}
