//! NFC/IR micro-controller sub-state

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum McuMode {
    #[default]
    Standby,
    Nfc,
    Busy,
}

impl McuMode {
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Standby => 0x01,
            Self::Nfc => 0x04,
            Self::Busy => 0x06,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum McuPower {
    #[default]
    Suspend,
    Resume,
}

/// Firmware version reported in the MCU status frame
const MCU_FIRMWARE: [u8; 4] = [0x00, 0x08, 0x00, 0x1B];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct McuState {
    mode: McuMode,
    power: McuPower,
}

impl McuState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> McuMode {
        self.mode
    }

    pub fn power(&self) -> McuPower {
        self.power
    }

    pub fn set_mode(&mut self, mode: McuMode) {
        if self.mode != mode {
            debug!("MCU mode {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
    }

    pub fn set_powered(&mut self, on: bool) {
        self.power = if on { McuPower::Resume } else { McuPower::Suspend };
    }

    /// MCU status frame: report id, unknown, firmware version, mode
    pub fn status_frame(&self) -> [u8; 8] {
        let mut frame = [0u8; 8];
        frame[0] = 0x01;
        frame[1] = 0x00;
        frame[2] = 0xFF;
        frame[3..7].copy_from_slice(&MCU_FIRMWARE);
        frame[7] = self.mode.as_byte();
        frame
    }
}
