//! Per-connection protocol state

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::mcu::McuState;
use crate::error::MacAddressError;
use crate::infrastructure::bluetooth::protocol::InputReportMode;

/// Bluetooth device address of the emulated controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(pub [u8; 6]);

impl FromStr for MacAddress {
    type Err = MacAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(|c| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(MacAddressError(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(MacAddressError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| MacAddressError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = MacAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// State the console negotiates with the controller over one connection
#[derive(Debug, Clone)]
pub struct ProtocolSession {
    elapsed: u8,
    last_sample: Instant,

    pub device_info_requested: bool,
    pub imu_enabled: bool,
    pub vibration_enabled: bool,
    pub player_lights_assigned: bool,
    /// Recorded only; outgoing frames are always standard full mode
    pub input_mode: InputReportMode,

    pub mac: MacAddress,
    /// Last button bitmap pushed to the console
    pub buttons: [u8; 3],
    pub mcu: McuState,
}

impl ProtocolSession {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            elapsed: 0,
            last_sample: Instant::now(),
            device_info_requested: false,
            imu_enabled: false,
            vibration_enabled: false,
            player_lights_assigned: false,
            input_mode: InputReportMode::default(),
            mac,
            buttons: [0; 3],
            mcu: McuState::new(),
        }
    }

    /// Advance the rolling timer by 4 ticks per elapsed microsecond
    pub fn update_timer(&mut self, now: Instant) -> u8 {
        let micros = now.saturating_duration_since(self.last_sample).as_micros();
        let advance = (micros.wrapping_mul(4) & 0xFF) as u8;
        self.elapsed = self.elapsed.wrapping_add(advance);
        self.last_sample = now;
        self.elapsed
    }

    pub fn elapsed(&self) -> u8 {
        self.elapsed
    }

    /// The console has finished pairing once it enabled vibration and
    /// assigned a player light
    pub fn handshake_complete(&self) -> bool {
        self.vibration_enabled && self.player_lights_assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_mac_parse() {
        let mac: MacAddress = "98:b6:e9:01:02:ff".parse().unwrap();
        assert_eq!(mac.0, [0x98, 0xB6, 0xE9, 0x01, 0x02, 0xFF]);
        assert_eq!(mac.to_string(), "98:B6:E9:01:02:FF");
        assert!("98:b6:e9:01:02".parse::<MacAddress>().is_err());
        assert!("98:b6:e9:01:02:zz".parse::<MacAddress>().is_err());
        assert!("98:b6:e9:01:02:fff".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_serde() {
        let mac: MacAddress = serde_json::from_str("\"AA-BB-CC-DD-EE-01\"").unwrap();
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"AA:BB:CC:DD:EE:01\"");
    }

    #[test]
    fn test_timer_wraps() {
        let mut session = ProtocolSession::new(MacAddress([0; 6]));
        let start = session.last_sample;

        assert_eq!(session.update_timer(start + Duration::from_micros(10)), 40);
        // 40 + 240 wraps
        assert_eq!(session.update_timer(start + Duration::from_micros(70)), 24);
        assert_eq!(session.elapsed(), 24);
    }

    #[test]
    fn test_handshake_complete() {
        let mut session = ProtocolSession::new(MacAddress([0; 6]));
        assert!(!session.handshake_complete());
        session.vibration_enabled = true;
        assert!(!session.handshake_complete());
        session.player_lights_assigned = true;
        assert!(session.handshake_complete());
    }
}
