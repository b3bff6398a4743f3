//! Subcommand Engine
//!
//! Turns output reports from the console into input reports, updating the
//! session as it goes. Every supported subcommand has one handler in
//! [`HANDLERS`]; anything unrecognised gets a plain standard report.
//!
//! Unknown subcommands are deliberately not NACKed: the console answers a
//! NACK by resending the request, and the two sides end up looping.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::domain::mcu::McuMode;
use crate::domain::session::ProtocolSession;
use crate::infrastructure::bluetooth::checksum::crc8;
use crate::infrastructure::bluetooth::pool::ReportPool;
use crate::infrastructure::bluetooth::protocol::{
    InputReportId, InputReportMode, McuCommand, OutputReportId, Subcommand,
};
use crate::infrastructure::bluetooth::report::{InputReport, OutputReport};
use crate::infrastructure::bluetooth::spi_flash::SpiFlash;

/// Length of the SetNfcMcuConfig reply block (offsets 16..50)
const MCU_CONFIG_BLOCK_LEN: usize = 34;

/// Sub-command byte inside SetMcuMode that selects a mode
const MCU_SET_MODE: u8 = 0x00;

type Handler = fn(&SubcommandEngine, &mut ProtocolSession, &OutputReport, &mut InputReport);

/// One entry per supported subcommand
const HANDLERS: [(Subcommand, Handler); 10] = [
    (Subcommand::RequestDeviceInfo, SubcommandEngine::answer_device_info),
    (Subcommand::SetInputReportMode, SubcommandEngine::answer_set_mode),
    (
        Subcommand::TriggerButtonsElapsedTime,
        SubcommandEngine::answer_trigger_elapsed_time,
    ),
    (
        Subcommand::SetShipmentLowPowerState,
        SubcommandEngine::answer_shipment_state,
    ),
    (Subcommand::SpiFlashRead, SubcommandEngine::answer_spi_read),
    (Subcommand::SetNfcMcuConfig, SubcommandEngine::answer_nfc_mcu_config),
    (Subcommand::SetNfcMcuState, SubcommandEngine::answer_nfc_mcu_state),
    (Subcommand::SetPlayerLights, SubcommandEngine::answer_player_lights),
    (Subcommand::EnableImu, SubcommandEngine::answer_enable_imu),
    (Subcommand::EnableVibration, SubcommandEngine::answer_enable_vibration),
];

pub struct SubcommandEngine {
    pool: Arc<ReportPool>,
    flash: SpiFlash,
}

impl SubcommandEngine {
    pub fn new(pool: Arc<ReportPool>, flash: SpiFlash) -> Self {
        Self { pool, flash }
    }

    pub fn pool(&self) -> &Arc<ReportPool> {
        &self.pool
    }

    /// Plain standard-full report: timer, telemetry, held buttons, IMU
    pub fn standard_report(&self, session: &mut ProtocolSession, now: Instant) -> InputReport {
        let elapsed = session.update_timer(now);

        let mut input = self.pool.acquire_standard();
        input.set_report_type(InputReportId::StandardFull);
        input.fill_standard_telemetry(elapsed, session.device_info_requested);
        input.set_button_state(&session.buttons);
        input.set_imu_sample(session.imu_enabled);
        input
    }

    /// Answer one output report
    pub fn handle(&self, session: &mut ProtocolSession, output: &OutputReport, now: Instant) -> InputReport {
        if output.id() != OutputReportId::RumbleAndSubcommand {
            return self.standard_report(session, now);
        }

        let handler = output
            .subcommand()
            .and_then(|subcommand| HANDLERS.iter().find(|(s, _)| *s == subcommand));

        let Some((subcommand, handler)) = handler else {
            debug!("Ignoring unknown subcommand: {}", output);
            return self.standard_report(session, now);
        };

        trace!("{}", output);
        let elapsed = session.update_timer(now);
        let mut input = self.pool.acquire_standard();
        input.set_report_type(InputReportId::SubcommandReplies);

        // Handlers mutate the session first so the telemetry below already
        // reflects a freshly requested device info.
        handler(self, session, output, &mut input);

        input.fill_standard_telemetry(elapsed, session.device_info_requested);
        input.set_button_state(&session.buttons);
        debug!("Answered {}", subcommand);
        trace!("{}", input);
        input
    }

    fn answer_device_info(&self, session: &mut ProtocolSession, _: &OutputReport, input: &mut InputReport) {
        session.device_info_requested = true;
        input.ack_device_info(&session.mac.0);
    }

    fn answer_set_mode(&self, session: &mut ProtocolSession, output: &OutputReport, input: &mut InputReport) {
        let requested = output.subcommand_args()[0];
        match InputReportMode::from_byte(requested) {
            Some(mode) => session.input_mode = mode,
            None => debug!("Unknown input report mode: 0x{:02X}", requested),
        }
        input.ack_set_input_report_mode();
    }

    fn answer_trigger_elapsed_time(&self, _: &mut ProtocolSession, _: &OutputReport, input: &mut InputReport) {
        input.ack_trigger_buttons_elapsed_time();
    }

    fn answer_shipment_state(&self, _: &mut ProtocolSession, _: &OutputReport, input: &mut InputReport) {
        input.ack_set_shipment_low_power_state();
    }

    fn answer_spi_read(&self, _: &mut ProtocolSession, output: &OutputReport, input: &mut InputReport) {
        // Args: address (4 bytes little-endian), length
        let args = output.subcommand_args();
        let (low, high, length) = (args[0], args[1], args[4]);

        input.ack_spi_flash_read(low, high, length);
        match self.flash.read_into(input, low, high, length) {
            Some(region) => debug!("SPI read {:?} ({} bytes)", region, length),
            None => debug!("SPI read of unknown range 0x{:02X}{:02X}", high, low),
        }
    }

    fn answer_nfc_mcu_config(&self, session: &mut ProtocolSession, output: &OutputReport, input: &mut InputReport) {
        // The reply reports the MCU as it was before this command
        let mut block = [0u8; MCU_CONFIG_BLOCK_LEN];
        block[..8].copy_from_slice(&session.mcu.status_frame());

        match output.mcu_command() {
            Some(McuCommand::SetMcuMode) => {
                let args = output.mcu_command_args();
                if args[0] == MCU_SET_MODE {
                    match args[1] {
                        0x00 => session.mcu.set_mode(McuMode::Standby),
                        0x04 => session.mcu.set_mode(McuMode::Nfc),
                        mode => debug!("Unknown NFC MCU mode: 0x{:02X}", mode),
                    }
                } else {
                    debug!("Unknown NFC MCU subcommand: 0x{:02X}", args[0]);
                }
            }
            _ => debug!("Unknown NFC MCU command: 0x{:02X}", output.mcu_command_byte()),
        }

        input.ack_set_nfc_mcu_config(&block);
        let crc = crc8(input.checksum_region());
        input.append_checksum(crc);
    }

    fn answer_nfc_mcu_state(&self, session: &mut ProtocolSession, output: &OutputReport, input: &mut InputReport) {
        session.mcu.set_powered(output.subcommand_args()[0] == 0x01);
        input.ack_set_nfc_mcu_state();
    }

    fn answer_player_lights(&self, session: &mut ProtocolSession, output: &OutputReport, input: &mut InputReport) {
        session.player_lights_assigned = true;
        debug!("Player lights set to 0x{:02X}", output.subcommand_args()[0]);
        input.ack_set_player_lights();
    }

    fn answer_enable_imu(&self, session: &mut ProtocolSession, output: &OutputReport, input: &mut InputReport) {
        session.imu_enabled = output.subcommand_args()[0] == 0x01;
        input.ack_enable_imu();
    }

    fn answer_enable_vibration(&self, session: &mut ProtocolSession, _: &OutputReport, input: &mut InputReport) {
        session.vibration_enabled = true;
        input.ack_enable_vibration();
    }
}
