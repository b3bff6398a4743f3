//! Report Codec
//!
//! Owned input/output frames with offset-checked field accessors.
//!
//! # Input Report (50 bytes, standard mode)
//!
//! ```text
//! [0]     : Input header (0xA1)
//! [1]     : Report type tag
//! [2]     : Elapsed timer (low byte)
//! [3]     : Battery level | connection info
//! [4-6]   : Button state (right, shared, left)
//! [7-9]   : Left stick
//! [10-12] : Right stick
//! [13]    : Vibrator report
//! [14]    : ACK byte (subcommand replies) or IMU block start
//! [15]    : Echoed subcommand id
//! [16..]  : Reply payload
//! ```
//!
//! # Output Report (50 bytes)
//!
//! ```text
//! [0]     : Output header (0xA2)
//! [1]     : Report type tag
//! [2-10]  : Rumble data (ignored)
//! [11]    : Subcommand id, or MCU command for RequestNfcData
//! [12..]  : Subcommand arguments
//!           (SetNfcMcuConfig: [12] nested MCU command, [13..] its arguments)
//! ```

use std::fmt;
use std::ops::Range;

use crate::error::ReportError;
use crate::infrastructure::bluetooth::protocol::{
    InputReportId, McuCommand, OutputReportId, Subcommand, INPUT_REPORT_HEADER,
    OUTPUT_REPORT_HEADER, OUTPUT_REPORT_LENGTH, STANDARD_REPORT_LENGTH,
};

/// Canned 6-axis sample, three frames of accel + gyro
const IMU_SAMPLE: [u8; 36] = [
    0x75, 0xFD, 0xFD, 0xFF, 0x09, 0x10, 0x21, 0x00, 0xD5, 0xFF, 0xE0, 0xFF, //
    0x72, 0xFD, 0xF9, 0xFF, 0x0A, 0x10, 0x22, 0x00, 0xD5, 0xFF, 0xE0, 0xFF, //
    0x76, 0xFD, 0xFC, 0xFF, 0x09, 0x10, 0x23, 0x00, 0xD5, 0xFF, 0xE0, 0xFF,
];

/// Battery full (0x9_) + Pro Controller connection info (0x_0)
const BATTERY_CONNECTION_INFO: u8 = 0x90;

pub const LEFT_STICK_SAMPLE: [u8; 3] = [0x6F, 0xC8, 0x77];
pub const RIGHT_STICK_SAMPLE: [u8; 3] = [0x16, 0xD8, 0x7D];

const VIBRATOR_REPORT: u8 = 0x80;

/// Offsets into the input report
pub mod offset {
    pub const REPORT_ID: usize = 1;
    pub const TIMER: usize = 2;
    pub const BATTERY: usize = 3;
    pub const BUTTONS: usize = 4;
    pub const LEFT_STICK: usize = 7;
    pub const RIGHT_STICK: usize = 10;
    pub const VIBRATOR: usize = 13;
    pub const ACK: usize = 14;
    pub const IMU: usize = 14;
    pub const SUBCOMMAND_ID: usize = 15;
    pub const REPLY_DATA: usize = 16;
}

/// Device info reply: firmware version, controller type
const FIRMWARE_VERSION: [u8; 2] = [0x03, 0x8B];
const PRO_CONTROLLER: u8 = 0x03;

/// A frame sent from the controller to the console
///
/// Buffers come from [`ReportPool`](super::pool::ReportPool), which
/// guarantees the capacity every setter relies on.
#[derive(Clone, PartialEq, Eq)]
pub struct InputReport {
    data: Vec<u8>,
}

impl InputReport {
    /// Build a report holding the canonical template for `len` bytes
    pub fn with_len(len: usize) -> Self {
        let mut data = vec![0u8; len];
        data[0] = INPUT_REPORT_HEADER;
        Self { data }
    }

    pub fn standard() -> Self {
        Self::with_len(STANDARD_REPORT_LENGTH)
    }

    /// Restore the canonical template: header set, everything else zero
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.data[0] = INPUT_REPORT_HEADER;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn byte(&self, index: usize) -> u8 {
        self.data[index]
    }

    pub fn bytes(&self, range: Range<usize>) -> &[u8] {
        &self.data[range]
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub(crate) fn from_buffer(data: Vec<u8>) -> Self {
        let mut report = Self { data };
        report.reset();
        report
    }

    fn write(&mut self, at: usize, bytes: &[u8]) {
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Fill `count` bytes from `at` with `value`, clamped to the frame end.
    /// Returns the number of bytes written.
    pub fn fill(&mut self, at: usize, count: usize, value: u8) -> usize {
        let end = at.saturating_add(count).min(self.data.len());
        if at >= end {
            return 0;
        }
        self.data[at..end].fill(value);
        end - at
    }

    /// Copy as much of `bytes` as fits from `at`. Returns the number copied.
    pub fn copy_clamped(&mut self, at: usize, bytes: &[u8]) -> usize {
        let end = at.saturating_add(bytes.len()).min(self.data.len());
        if at >= end {
            return 0;
        }
        let count = end - at;
        self.data[at..end].copy_from_slice(&bytes[..count]);
        count
    }

    pub fn set_report_type(&mut self, id: InputReportId) {
        self.data[offset::REPORT_ID] = id.as_byte();
    }

    pub fn report_type(&self) -> u8 {
        self.data[offset::REPORT_ID]
    }

    /// Timer, and when the console has asked for device info, the
    /// battery/connection byte with neutral buttons and canned sticks.
    pub fn fill_standard_telemetry(&mut self, elapsed: u8, device_info_requested: bool) {
        self.data[offset::TIMER] = elapsed;

        if device_info_requested {
            self.data[offset::BATTERY] = BATTERY_CONNECTION_INFO;
            self.write(offset::BUTTONS, &[0x00, 0x00, 0x00]);
            self.write(offset::LEFT_STICK, &LEFT_STICK_SAMPLE);
            self.write(offset::RIGHT_STICK, &RIGHT_STICK_SAMPLE);
            self.data[offset::VIBRATOR] = VIBRATOR_REPORT;
        }
    }

    /// Copy the canned motion sample in; leaves the frame untouched when
    /// IMU reporting is off.
    pub fn set_imu_sample(&mut self, enabled: bool) {
        if !enabled {
            return;
        }
        self.write(offset::IMU, &IMU_SAMPLE);
    }

    pub fn set_button_state(&mut self, buttons: &[u8; 3]) {
        self.write(offset::BUTTONS, buttons);
    }

    pub fn button_state(&self) -> [u8; 3] {
        let mut buttons = [0u8; 3];
        buttons.copy_from_slice(&self.data[offset::BUTTONS..offset::BUTTONS + 3]);
        buttons
    }

    fn ack(&mut self, subcommand: Subcommand) {
        self.data[offset::ACK] = subcommand.ack_byte();
        self.data[offset::SUBCOMMAND_ID] = subcommand.as_byte();
    }

    pub fn ack_device_info(&mut self, mac: &[u8; 6]) {
        self.ack(Subcommand::RequestDeviceInfo);
        self.write(offset::REPLY_DATA, &FIRMWARE_VERSION);
        self.data[18] = PRO_CONTROLLER;
        self.data[19] = 0x02; // Unknown, always 2
        self.write(20, mac);
        self.data[26] = 0x01; // Unknown, always 1
        self.data[27] = 0x01; // Colours come from SPI
    }

    pub fn ack_set_input_report_mode(&mut self) {
        self.ack(Subcommand::SetInputReportMode);
    }

    pub fn ack_trigger_buttons_elapsed_time(&mut self) {
        self.ack(Subcommand::TriggerButtonsElapsedTime);
    }

    pub fn ack_set_shipment_low_power_state(&mut self) {
        self.ack(Subcommand::SetShipmentLowPowerState);
    }

    /// Header of an SPI read reply: address echo and section length.
    /// The flash contents follow from offset 21.
    pub fn ack_spi_flash_read(&mut self, low: u8, high: u8, length: u8) {
        self.ack(Subcommand::SpiFlashRead);
        self.data[16] = low;
        self.data[17] = high;
        self.data[20] = length;
    }

    pub fn ack_set_nfc_mcu_config(&mut self, block: &[u8]) {
        self.ack(Subcommand::SetNfcMcuConfig);
        self.write(offset::REPLY_DATA, block);
    }

    pub fn ack_set_nfc_mcu_state(&mut self) {
        self.ack(Subcommand::SetNfcMcuState);
    }

    pub fn ack_set_player_lights(&mut self) {
        self.ack(Subcommand::SetPlayerLights);
    }

    pub fn ack_enable_imu(&mut self) {
        self.ack(Subcommand::EnableImu);
    }

    pub fn ack_enable_vibration(&mut self) {
        self.ack(Subcommand::EnableVibration);
    }

    /// Region covered by the MCU checksum (reply data through the last byte)
    pub fn checksum_region(&self) -> &[u8] {
        &self.data[offset::REPLY_DATA..]
    }

    pub fn append_checksum(&mut self, crc: u8) {
        let last = self.data.len() - 1;
        self.data[last] = crc;
    }
}

impl fmt::Debug for InputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for InputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.data[offset::REPORT_ID] == InputReportId::SubcommandReplies.as_byte() {
            match Subcommand::from_byte(self.data[offset::SUBCOMMAND_ID]) {
                Some(subcommand) => write!(f, "--- {} reply --- ", subcommand)?,
                None => write!(f, "--- UNKNOWN reply --- ")?,
            }
        }
        write!(f, "payload: {:02X?} ", &self.data[..offset::ACK])?;
        write!(f, "subcommand: {:02X?}", &self.data[offset::ACK..])
    }
}

/// A validated frame sent from the console to the controller
#[derive(Clone, PartialEq, Eq)]
pub struct OutputReport {
    data: [u8; OUTPUT_REPORT_LENGTH],
}

/// Check a raw frame, returning its report type
pub fn validate(frame: &[u8]) -> Result<OutputReportId, ReportError> {
    if frame.len() != OUTPUT_REPORT_LENGTH {
        return Err(ReportError::BadLength(frame.len()));
    }
    if frame[0] != OUTPUT_REPORT_HEADER {
        return Err(ReportError::Malformed(frame[0]));
    }
    let id = OutputReportId::from_byte(frame[1]).ok_or(ReportError::UnknownReportType(frame[1]))?;
    if id == OutputReportId::RumbleAndSubcommand && Subcommand::from_byte(frame[11]).is_none() {
        return Err(ReportError::UnknownSubcommand(frame[11]));
    }
    Ok(id)
}

impl OutputReport {
    /// Validate and take ownership of a raw frame
    pub fn parse(frame: &[u8]) -> Result<Self, ReportError> {
        validate(frame)?;
        let mut data = [0u8; OUTPUT_REPORT_LENGTH];
        data.copy_from_slice(frame);
        Ok(Self { data })
    }

    pub fn id(&self) -> OutputReportId {
        // Checked by `parse`
        OutputReportId::from_byte(self.data[1]).unwrap_or(OutputReportId::RumbleOnly)
    }

    /// Subcommand of a `RumbleAndSubcommand` frame
    pub fn subcommand(&self) -> Option<Subcommand> {
        if self.id() != OutputReportId::RumbleAndSubcommand {
            return None;
        }
        Subcommand::from_byte(self.data[11])
    }

    pub fn subcommand_args(&self) -> &[u8] {
        &self.data[12..]
    }

    fn is_mcu_config(&self) -> bool {
        self.subcommand() == Some(Subcommand::SetNfcMcuConfig)
    }

    /// Raw MCU command byte: nested at 12 inside `SetNfcMcuConfig`, else at 11
    pub fn mcu_command_byte(&self) -> u8 {
        if self.is_mcu_config() {
            self.data[12]
        } else {
            self.data[11]
        }
    }

    pub fn mcu_command(&self) -> Option<McuCommand> {
        McuCommand::from_byte(self.mcu_command_byte())
    }

    pub fn mcu_command_args(&self) -> &[u8] {
        if self.is_mcu_config() {
            &self.data[13..]
        } else {
            &self.data[12..]
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for OutputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for OutputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.subcommand(), self.mcu_command()) {
            (Some(Subcommand::SetNfcMcuConfig), Some(mcu)) => {
                write!(f, "--- SetNfcMcuConfig({:?}) msg --- ", mcu)?
            }
            (Some(subcommand), _) => write!(f, "--- {} msg --- ", subcommand)?,
            (None, _) => write!(f, "--- {:?} msg --- ", self.id())?,
        }
        write!(f, "payload: {:02X?} ", &self.data[..11])?;
        write!(f, "subcommand: {:02X?}", &self.data[11..])
    }
}
