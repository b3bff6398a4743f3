//! Error types

use thiserror::Error;

/// Reasons an output report from the console is rejected
///
/// All of these are recovered inside the session loop by answering with a
/// plain standard report.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportError {
    #[error("Bad report length: {0} (expected 50)")]
    BadLength(usize),

    #[error("Malformed report: header 0x{0:02X}")]
    Malformed(u8),

    #[error("Unknown output report type: 0x{0:02X}")]
    UnknownReportType(u8),

    #[error("Unknown subcommand: 0x{0:02X}")]
    UnknownSubcommand(u8),
}

/// Failures that end a controller session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Handshake failed after {attempts} consecutive I/O errors: {source}")]
    Handshake {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Console disconnected")]
    Disconnected,
}

/// Invalid Bluetooth device address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid MAC address: {0}")]
pub struct MacAddressError(pub String);
