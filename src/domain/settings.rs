use crate::domain::session::MacAddress;
use crate::infrastructure::bluetooth::spi_flash::StickCalibration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "pro_controller_emu".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Address reported in the device info reply
    #[serde(default = "default_mac")]
    pub mac_address: MacAddress,

    // Endpoints
    #[serde(default = "default_interrupt_socket")]
    pub interrupt_socket: PathBuf,
    #[serde(default = "default_control_socket")]
    pub control_socket: PathBuf,
    #[serde(default = "default_input_socket")]
    pub input_socket_name: String,

    // Timing
    #[serde(default = "default_handshake_idle_ms")]
    pub handshake_idle_ms: u64,
    #[serde(default = "default_handshake_active_hz")]
    pub handshake_active_hz: u32,
    #[serde(default = "default_steady_hz")]
    pub steady_hz: u32,
    #[serde(default = "default_keepalive_ticks")]
    pub keepalive_ticks: u32,
    #[serde(default = "default_max_handshake_errors")]
    pub max_handshake_errors: u32,

    #[serde(default)]
    pub stick_calibration: StickCalibration,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mac_address: default_mac(),
            interrupt_socket: default_interrupt_socket(),
            control_socket: default_control_socket(),
            input_socket_name: default_input_socket(),
            handshake_idle_ms: default_handshake_idle_ms(),
            handshake_active_hz: default_handshake_active_hz(),
            steady_hz: default_steady_hz(),
            keepalive_ticks: default_keepalive_ticks(),
            max_handshake_errors: default_max_handshake_errors(),
            stick_calibration: StickCalibration::default(),
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn handshake_idle_period(&self) -> Duration {
        Duration::from_millis(self.handshake_idle_ms.max(1))
    }

    pub fn handshake_active_period(&self) -> Duration {
        Duration::from_secs(1) / self.handshake_active_hz.max(1)
    }

    pub fn steady_period(&self) -> Duration {
        Duration::from_secs(1) / self.steady_hz.max(1)
    }
}

fn default_mac() -> MacAddress {
    MacAddress([0x98, 0xB6, 0xE9, 0x12, 0x34, 0x56])
}
fn default_interrupt_socket() -> PathBuf {
    std::env::temp_dir().join("pro_controller_interrupt.sock")
}
fn default_control_socket() -> PathBuf {
    std::env::temp_dir().join("pro_controller_control.sock")
}
fn default_input_socket() -> String {
    crate::input_worker::SOCKET_NAME.to_string()
}
fn default_handshake_idle_ms() -> u64 {
    1000
}
fn default_handshake_active_hz() -> u32 {
    15
}
fn default_steady_hz() -> u32 {
    66
}
fn default_keepalive_ticks() -> u32 {
    132
}
fn default_max_handshake_errors() -> u32 {
    5
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, falling back to defaults
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::open(settings_path))
    }

    /// Load from an explicit path, falling back to defaults if it is missing
    /// or unreadable
    pub fn open(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ProControllerEmu");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_default() {
        let settings: Settings =
            serde_json::from_str(r#"{ "mac_address": "01:02:03:04:05:06", "steady_hz": 60 }"#)
                .unwrap();
        assert_eq!(settings.mac_address.0, [1, 2, 3, 4, 5, 6]);
        assert_eq!(settings.steady_hz, 60);
        assert_eq!(settings.keepalive_ticks, 132);
        assert_eq!(settings.log_settings.file_name_prefix, "pro_controller_emu");
        assert_eq!(settings.stick_calibration, StickCalibration::default());
    }

    #[test]
    fn test_periods() {
        let settings = Settings::default();
        assert_eq!(settings.handshake_idle_period(), Duration::from_secs(1));
        assert_eq!(settings.handshake_active_period(), Duration::from_secs(1) / 15);
        assert_eq!(settings.steady_period(), Duration::from_secs(1) / 66);
    }

    #[test]
    fn test_open_save_roundtrip() {
        let path = std::env::temp_dir().join(format!("pce-settings-{}.json", std::process::id()));
        let _ = fs::remove_file(&path);

        let mut service = SettingsService::open(path.clone());
        assert_eq!(service.get().max_handshake_errors, 5);
        service.get_mut().max_handshake_errors = 9;
        service.save().unwrap();

        let reloaded = SettingsService::open(path.clone());
        assert_eq!(reloaded.get().max_handshake_errors, 9);
        fs::remove_file(&path).unwrap();
    }
}
