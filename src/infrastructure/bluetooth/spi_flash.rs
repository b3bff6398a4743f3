//! Emulated SPI flash
//!
//! The console reads calibration and identity data from the controller's
//! SPI flash during pairing. Only the ranges it actually asks for are
//! known here; most are answered with erased-flash filler (0xFF).
//!
//! Reference: dekuNukem spi_flash_notes.md

use serde::{Deserialize, Serialize};

use crate::infrastructure::bluetooth::report::InputReport;

/// Byte an erased flash cell reads as
pub const FILLER: u8 = 0xFF;

/// Offset of the first data byte in an SPI read reply
pub const DATA_OFFSET: usize = 21;

/// Factory stick calibration, packed 12-bit values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickCalibration {
    pub left: [u8; 9],
    pub right: [u8; 9],
}

impl Default for StickCalibration {
    fn default() -> Self {
        Self {
            left: [0xBA, 0xF5, 0x62, 0x6F, 0xC8, 0x77, 0xED, 0x95, 0x5B],
            right: [0x16, 0xD8, 0x7D, 0xF2, 0xB5, 0x5F, 0x86, 0x65, 0x5E],
        }
    }
}

/// What a known flash range contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashRegion {
    SerialNumber,
    BodyColor,
    FactorySensorParams,
    FactoryStickParams,
    UserStickCalibration,
    FactoryCalibration1,
    FactoryCalibration2,
}

impl FlashRegion {
    /// Look up a region by the (low, high) address bytes of the request
    pub fn from_address(low: u8, high: u8) -> Option<Self> {
        match (low, high) {
            (0x00, 0x60) => Some(Self::SerialNumber),
            (0x50, 0x60) => Some(Self::BodyColor),
            (0x80, 0x60) => Some(Self::FactorySensorParams),
            (0x98, 0x60) => Some(Self::FactoryStickParams),
            (0x10, 0x80) => Some(Self::UserStickCalibration),
            (0x20, 0x60) => Some(Self::FactoryCalibration1),
            (0x3D, 0x60) => Some(Self::FactoryCalibration2),
            _ => None,
        }
    }
}

/// Canned flash contents
#[derive(Debug, Clone, Default)]
pub struct SpiFlash {
    sticks: StickCalibration,
}

impl SpiFlash {
    pub fn new(sticks: StickCalibration) -> Self {
        Self { sticks }
    }

    /// Write `length` bytes of the region at (low, high) into the reply.
    ///
    /// Returns `None` for unknown ranges, which are left unfilled.
    pub fn read_into(&self, report: &mut InputReport, low: u8, high: u8, length: u8) -> Option<FlashRegion> {
        let region = FlashRegion::from_address(low, high)?;
        let length = length as usize;

        match region {
            FlashRegion::FactoryCalibration2 => {
                let mut written = report.copy_clamped(DATA_OFFSET, &self.sticks.left);
                written += report.copy_clamped(DATA_OFFSET + written, &self.sticks.right);
                report.fill(DATA_OFFSET + written, length.saturating_sub(written), FILLER);
            }
            // TODO: serve real factory sensor/stick parameters once captured from hardware
            _ => {
                report.fill(DATA_OFFSET, length, FILLER);
            }
        }

        Some(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stick_calibration_has_no_filler() {
        let flash = SpiFlash::default();
        let mut report = InputReport::standard();
        assert_eq!(
            flash.read_into(&mut report, 0x3D, 0x60, 18),
            Some(FlashRegion::FactoryCalibration2)
        );

        let sticks = StickCalibration::default();
        assert_eq!(report.bytes(21..30), &sticks.left);
        assert_eq!(report.bytes(30..39), &sticks.right);
        assert_eq!(report.byte(39), 0x00);
    }

    #[test]
    fn test_stick_calibration_padded_to_length() {
        let flash = SpiFlash::default();
        let mut report = InputReport::standard();
        flash.read_into(&mut report, 0x3D, 0x60, 0x19);
        assert!(report.bytes(39..46).iter().all(|&b| b == FILLER));
        assert_eq!(report.byte(46), 0x00);
    }

    #[test]
    fn test_serial_number_is_filler() {
        let flash = SpiFlash::default();
        let mut report = InputReport::standard();
        flash.read_into(&mut report, 0x00, 0x60, 16);
        assert!(report.bytes(21..37).iter().all(|&b| b == FILLER));
        assert_eq!(report.byte(20), 0x00);
        assert_eq!(report.byte(37), 0x00);
    }

    #[test]
    fn test_unknown_range_untouched() {
        let flash = SpiFlash::default();
        let mut report = InputReport::standard();
        assert_eq!(flash.read_into(&mut report, 0x00, 0x70, 16), None);
        assert!(report.bytes(21..50).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_oversized_request_clamped() {
        let flash = SpiFlash::default();
        let mut report = InputReport::standard();
        flash.read_into(&mut report, 0x20, 0x60, 0xFF);
        assert!(report.bytes(21..50).iter().all(|&b| b == FILLER));
    }

    #[test]
    fn test_custom_calibration() {
        let sticks = StickCalibration {
            left: [1; 9],
            right: [2; 9],
        };
        let flash = SpiFlash::new(sticks);
        let mut report = InputReport::standard();
        flash.read_into(&mut report, 0x3D, 0x60, 18);
        assert_eq!(report.bytes(21..30), &[1; 9]);
        assert_eq!(report.bytes(30..39), &[2; 9]);
    }
}
