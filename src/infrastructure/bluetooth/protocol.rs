//! Pro Controller HID Protocol
//!
//! Identification constants and report/subcommand codes used on the
//! interrupt channel between the emulated controller and the console.
//!
//! Reference: dekuNukem's Nintendo_Switch_Reverse_Engineering notes
//! (bluetooth_hid_notes.md, bluetooth_hid_subcommands_notes.md).

use std::fmt;

/// First byte of every frame sent to the console
pub const INPUT_REPORT_HEADER: u8 = 0xA1;

/// First byte of every frame received from the console
pub const OUTPUT_REPORT_HEADER: u8 = 0xA2;

/// Standard input report length (header + 49 bytes)
pub const STANDARD_REPORT_LENGTH: usize = 50;

/// NFC/IR mode input report length (header + 362 bytes)
pub const NFC_REPORT_LENGTH: usize = 363;

/// Output reports are always this long on the interrupt channel
pub const OUTPUT_REPORT_LENGTH: usize = 50;

/// Report type tag written to byte 1 of an input report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputReportId {
    /// Reply to a subcommand carried by a `RumbleAndSubcommand` frame
    SubcommandReplies,
    /// Standard full mode - buttons, sticks, IMU at 60Hz
    StandardFull,
    /// Standard full mode plus NFC/IR MCU data
    NfcMcu,
    /// Simple HID mode - button presses only
    SimpleHid,
}

impl InputReportId {
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::SubcommandReplies => 0x21,
            Self::StandardFull => 0x30,
            Self::NfcMcu => 0x31,
            Self::SimpleHid => 0x3F,
        }
    }
}

/// Report type tag found at byte 1 of an output report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputReportId {
    RumbleAndSubcommand,
    UpdateNfcPacket,
    RumbleOnly,
    RequestNfcData,
}

impl OutputReportId {
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::RumbleAndSubcommand => 0x01,
            Self::UpdateNfcPacket => 0x03,
            Self::RumbleOnly => 0x10,
            Self::RequestNfcData => 0x11,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::RumbleAndSubcommand),
            0x03 => Some(Self::UpdateNfcPacket),
            0x10 => Some(Self::RumbleOnly),
            0x11 => Some(Self::RequestNfcData),
            _ => None,
        }
    }
}

/// Input report mode requested through `SetInputReportMode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputReportMode {
    StandardFull,
    NfcMcu,
    SimpleHid,
}

impl InputReportMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x30 => Some(Self::StandardFull),
            0x31 => Some(Self::NfcMcu),
            0x3F => Some(Self::SimpleHid),
            _ => None,
        }
    }
}

impl Default for InputReportMode {
    fn default() -> Self {
        Self::StandardFull
    }
}

/// Subcommands understood by the emulated controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subcommand {
    RequestDeviceInfo,
    SetInputReportMode,
    TriggerButtonsElapsedTime,
    SetShipmentLowPowerState,
    SpiFlashRead,
    SetNfcMcuConfig,
    SetNfcMcuState,
    SetPlayerLights,
    EnableImu,
    EnableVibration,
}

impl Subcommand {
    /// Every supported subcommand, in wire-code order
    pub const ALL: [Subcommand; 10] = [
        Self::RequestDeviceInfo,
        Self::SetInputReportMode,
        Self::TriggerButtonsElapsedTime,
        Self::SetShipmentLowPowerState,
        Self::SpiFlashRead,
        Self::SetNfcMcuConfig,
        Self::SetNfcMcuState,
        Self::SetPlayerLights,
        Self::EnableImu,
        Self::EnableVibration,
    ];

    pub fn as_byte(&self) -> u8 {
        match self {
            Self::RequestDeviceInfo => 0x02,
            Self::SetInputReportMode => 0x03,
            Self::TriggerButtonsElapsedTime => 0x04,
            Self::SetShipmentLowPowerState => 0x08,
            Self::SpiFlashRead => 0x10,
            Self::SetNfcMcuConfig => 0x21,
            Self::SetNfcMcuState => 0x22,
            Self::SetPlayerLights => 0x30,
            Self::EnableImu => 0x40,
            Self::EnableVibration => 0x48,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_byte() == byte)
    }

    /// ACK byte placed at offset 14 of the reply
    ///
    /// The high bit marks an ACK; the low bits tag the reply data type.
    pub fn ack_byte(&self) -> u8 {
        match self {
            Self::RequestDeviceInfo => 0x82,
            Self::TriggerButtonsElapsedTime => 0x83,
            Self::SpiFlashRead => 0x90,
            Self::SetNfcMcuConfig => 0xA0,
            Self::EnableVibration => 0x82,
            Self::SetInputReportMode
            | Self::SetShipmentLowPowerState
            | Self::SetNfcMcuState
            | Self::SetPlayerLights
            | Self::EnableImu => 0x80,
        }
    }
}

impl fmt::Display for Subcommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Commands addressed to the NFC/IR MCU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuCommand {
    RequestMcuStatus,
    RequestNfcDataReport,
    RequestIrDataReport,
    SetMcuMode,
}

impl McuCommand {
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::RequestMcuStatus => 0x01,
            Self::RequestNfcDataReport => 0x02,
            Self::RequestIrDataReport => 0x03,
            Self::SetMcuMode => 0x21,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::RequestMcuStatus),
            0x02 => Some(Self::RequestNfcDataReport),
            0x03 => Some(Self::RequestIrDataReport),
            0x21 => Some(Self::SetMcuMode),
            _ => None,
        }
    }
}
