//! Session Loop
//!
//! Drives one console connection from first contact to disconnect.
//!
//! The handshake polls slowly (1 s) until the console sends its first
//! valid frame, then quickly (1/15 s), answering every tick. Once the
//! console has enabled vibration and assigned a player light the session
//! switches to a fixed rate (66 Hz) where a frame is written only when
//! something changed or a keepalive is due.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::domain::controller::ControllerHandle;
use crate::domain::models::{SessionEvent, SessionPhase};
use crate::domain::nfc::NfcResponder;
use crate::domain::session::ProtocolSession;
use crate::domain::settings::Settings;
use crate::error::{ReportError, SessionError};
use crate::infrastructure::bluetooth::connection::ReportTransport;
use crate::infrastructure::bluetooth::engine::SubcommandEngine;
use crate::infrastructure::bluetooth::protocol::OutputReportId;
use crate::infrastructure::bluetooth::report::{InputReport, OutputReport};

/// Reads are made into a buffer larger than a frame so oversized frames
/// are seen as such rather than truncated
const SCRATCH_LEN: usize = 64;

/// Tick timing for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handshake period before the console has said anything
    pub handshake_idle: Duration,
    /// Handshake period once a valid frame has arrived
    pub handshake_active: Duration,
    pub steady_period: Duration,
    /// Steady ticks without a change before a keepalive is written
    pub keepalive_ticks: u32,
    /// Consecutive hard read errors tolerated during the handshake
    pub max_handshake_errors: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            handshake_idle: settings.handshake_idle_period(),
            handshake_active: settings.handshake_active_period(),
            steady_period: settings.steady_period(),
            keepalive_ticks: settings.keepalive_ticks.max(1),
            max_handshake_errors: settings.max_handshake_errors.max(1),
        }
    }
}

/// Result of one non-blocking read
enum Received {
    Frame(OutputReport),
    Nothing,
    Invalid(ReportError),
    Closed,
    Failed(io::Error),
}

/// Whether the loop keeps going after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Closed,
}

/// One console connection
pub struct SessionServer {
    transport: Arc<dyn ReportTransport>,
    engine: SubcommandEngine,
    session: ProtocolSession,
    controller: ControllerHandle,
    nfc: Box<dyn NfcResponder>,
    config: SessionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,

    phase: SessionPhase,
    scratch: [u8; SCRATCH_LEN],
    frame_seen: bool,
    hard_errors: u32,
    ticks_since_write: u32,
}

impl SessionServer {
    pub fn new(
        transport: Arc<dyn ReportTransport>,
        engine: SubcommandEngine,
        session: ProtocolSession,
        controller: ControllerHandle,
        nfc: Box<dyn NfcResponder>,
        config: SessionConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            engine,
            session,
            controller,
            nfc,
            config,
            events,
            phase: SessionPhase::Handshaking,
            scratch: [0; SCRATCH_LEN],
            frame_seen: false,
            hard_errors: 0,
            ticks_since_write: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> &ProtocolSession {
        &self.session
    }

    /// Run until the console disconnects, the handshake fails, or
    /// `shutdown` fires. Shutdown is only looked at between ticks.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SessionError> {
        let result = self.run_phases(&mut shutdown).await;
        self.set_phase(SessionPhase::Closed);
        result
    }

    async fn run_phases(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), SessionError> {
        self.set_phase(SessionPhase::Handshaking);
        let hello = self.engine.standard_report(&mut self.session, Instant::now());
        self.write(hello);

        while self.phase == SessionPhase::Handshaking {
            let period = if self.frame_seen {
                self.config.handshake_active
            } else {
                self.config.handshake_idle
            };

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => {
                    info!("Shutdown requested during handshake");
                    return Ok(());
                }
            }

            if self.handshake_tick(Instant::now())? == Flow::Closed {
                return Err(SessionError::Disconnected);
            }
        }

        let mut interval = tokio::time::interval(self.config.steady_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    info!("Shutdown requested");
                    return Ok(());
                }
            }

            if self.steady_tick(Instant::now()) == Flow::Closed {
                return Err(SessionError::Disconnected);
            }
        }
    }

    /// One handshake tick: every tick answers with exactly one frame
    pub fn handshake_tick(&mut self, now: Instant) -> Result<Flow, SessionError> {
        let mut report = match self.receive() {
            Received::Closed => return Ok(Flow::Closed),
            Received::Failed(e) => {
                self.hard_errors += 1;
                if self.hard_errors >= self.config.max_handshake_errors {
                    return Err(SessionError::Handshake {
                        attempts: self.hard_errors,
                        source: e,
                    });
                }
                warn!(
                    "Handshake read error ({}/{}): {}",
                    self.hard_errors, self.config.max_handshake_errors, e
                );
                self.engine.standard_report(&mut self.session, now)
            }
            Received::Nothing => {
                self.hard_errors = 0;
                self.engine.standard_report(&mut self.session, now)
            }
            Received::Invalid(e) => {
                self.hard_errors = 0;
                debug!("Rejected frame during handshake: {}", e);
                self.engine.standard_report(&mut self.session, now)
            }
            Received::Frame(output) => {
                self.hard_errors = 0;
                if !self.frame_seen {
                    debug!("First frame from console, polling faster");
                    self.frame_seen = true;
                }
                self.engine.handle(&mut self.session, &output, now)
            }
        };

        self.merge_buttons(&mut report);
        self.write(report);

        if self.session.handshake_complete() {
            info!("Handshake complete");
            self.set_phase(SessionPhase::Steady);
        }
        Ok(Flow::Continue)
    }

    /// One steady-state tick: writes only on change or keepalive
    pub fn steady_tick(&mut self, now: Instant) -> Flow {
        let mut changed = false;

        let mut report = match self.receive() {
            Received::Closed => return Flow::Closed,
            Received::Failed(e) => {
                warn!("Read error, skipping tick: {}", e);
                // A skipped tick still counts towards the keepalive
                self.ticks_since_write += 1;
                if self.ticks_since_write >= self.config.keepalive_ticks {
                    self.ticks_since_write = 0;
                    let keepalive = self.engine.standard_report(&mut self.session, now);
                    self.write(keepalive);
                }
                return Flow::Continue;
            }
            Received::Nothing => self.engine.standard_report(&mut self.session, now),
            Received::Invalid(e) => {
                trace!("Rejected frame: {}", e);
                self.engine.standard_report(&mut self.session, now)
            }
            Received::Frame(output) => match output.id() {
                OutputReportId::RequestNfcData => {
                    self.nfc.handle_nfc_request(&self.session.mcu, &output);
                    return Flow::Continue;
                }
                OutputReportId::RumbleAndSubcommand => {
                    changed = true;
                    self.engine.handle(&mut self.session, &output, now)
                }
                OutputReportId::RumbleOnly | OutputReportId::UpdateNfcPacket => {
                    self.engine.standard_report(&mut self.session, now)
                }
            },
        };

        changed |= self.merge_buttons(&mut report);
        self.ticks_since_write += 1;

        if changed || self.ticks_since_write >= self.config.keepalive_ticks {
            self.ticks_since_write = 0;
            self.write(report);
        } else {
            self.engine.pool().release(report);
        }
        Flow::Continue
    }

    /// Non-blocking read and validation of at most one frame
    fn receive(&mut self) -> Received {
        match self.transport.try_recv(&mut self.scratch) {
            Ok(0) => {
                info!("Console closed the connection");
                Received::Closed
            }
            Ok(len) => match OutputReport::parse(&self.scratch[..len]) {
                Ok(output) => Received::Frame(output),
                Err(e) => Received::Invalid(e),
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Received::Nothing,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Received::Nothing,
            Err(e) => Received::Failed(e),
        }
    }

    /// Pull pending button changes into the session and the outgoing frame.
    /// Returns whether the bitmap changed.
    fn merge_buttons(&mut self, report: &mut InputReport) -> bool {
        match self.controller.take_if_dirty() {
            Some(buttons) => {
                trace!("Buttons {:02X?}", buttons);
                self.session.buttons = buttons;
                report.set_button_state(&buttons);
                true
            }
            None => false,
        }
    }

    fn write(&mut self, report: InputReport) {
        match self.transport.send(report.as_bytes()) {
            Ok(_) => trace!("{}", report),
            Err(e) => warn!("Failed to write report: {}", e),
        }
        self.engine.pool().release(report);
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
        let _ = self.events.send(SessionEvent::Status(phase));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::controller::Button;
    use crate::domain::nfc::AmiiboStub;
    use crate::domain::session::MacAddress;
    use crate::infrastructure::bluetooth::pool::{ReportPool, SizeClass};
    use crate::infrastructure::bluetooth::protocol::Subcommand;
    use crate::infrastructure::bluetooth::report::tests::{subcommand_frame, typed_frame};
    use crate::infrastructure::bluetooth::spi_flash::SpiFlash;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    enum Inbound {
        Frame(Vec<u8>),
        Error(io::ErrorKind),
        Eof,
    }

    /// In-memory interrupt channel; idle reads would block
    #[derive(Default)]
    struct MockTransport {
        inbound: Mutex<VecDeque<Inbound>>,
        writes: Mutex<Vec<(Instant, Vec<u8>)>>,
    }

    impl MockTransport {
        fn push(&self, inbound: Inbound) {
            self.inbound.lock().push_back(inbound);
        }

        fn writes(&self) -> Vec<(Instant, Vec<u8>)> {
            self.writes.lock().clone()
        }

        fn write_count(&self) -> usize {
            self.writes.lock().len()
        }
    }

    impl ReportTransport for MockTransport {
        fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            match self.inbound.lock().pop_front() {
                Some(Inbound::Frame(frame)) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                Some(Inbound::Error(kind)) => Err(io::Error::from(kind)),
                Some(Inbound::Eof) => Ok(0),
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }

        fn send(&self, frame: &[u8]) -> io::Result<usize> {
            self.writes.lock().push((Instant::now(), frame.to_vec()));
            Ok(frame.len())
        }
    }

    struct Harness {
        server: SessionServer,
        transport: Arc<MockTransport>,
        controller: ControllerHandle,
        pool: Arc<ReportPool>,
        nfc: Arc<Mutex<AmiiboStub>>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(MockTransport::default());
        let pool = Arc::new(ReportPool::new());
        let controller = ControllerHandle::new();
        let nfc = Arc::new(Mutex::new(AmiiboStub::new()));
        let (tx, events) = mpsc::unbounded_channel();
        let config = SessionConfig {
            max_handshake_errors: 3,
            ..SessionConfig::default()
        };
        let server = SessionServer::new(
            transport.clone(),
            SubcommandEngine::new(pool.clone(), SpiFlash::default()),
            ProtocolSession::new(MacAddress([0x98, 0xB6, 0xE9, 1, 2, 3])),
            controller.clone(),
            Box::new(nfc.clone()),
            config,
            tx,
        );
        Harness {
            server,
            transport,
            controller,
            pool,
            nfc,
            events,
        }
    }

    fn assert_close(actual: Duration, expected: Duration) {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            diff <= Duration::from_millis(2),
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionPhase> {
        let mut phases = Vec::new();
        while let Ok(SessionEvent::Status(phase)) = events.try_recv() {
            phases.push(phase);
        }
        phases
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_polls_slowly_while_idle() {
        let h = harness();
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(h.server.run(shutdown));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        stop.send(true).unwrap();
        task.await.unwrap().unwrap();

        // Greeting plus three ticks
        let writes = h.transport.writes();
        assert_eq!(writes.len(), 4);
        for pair in writes.windows(2) {
            assert_close(pair[1].0 - pair[0].0, Duration::from_secs(1));
        }
        for (_, frame) in &writes {
            assert_eq!(frame[0], 0xA1);
            assert_eq!(frame[1], 0x30);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_speeds_up_after_first_frame() {
        let h = harness();
        h.transport
            .push(Inbound::Frame(typed_frame(OutputReportId::RumbleOnly)));
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(h.server.run(shutdown));

        tokio::time::sleep(Duration::from_millis(1250)).await;
        stop.send(true).unwrap();
        task.await.unwrap().unwrap();

        let writes = h.transport.writes();
        assert!(writes.len() >= 4, "only {} writes", writes.len());
        assert_close(writes[1].0 - writes[0].0, Duration::from_secs(1));
        let fast = Duration::from_secs(1) / 15;
        for pair in writes[1..].windows(2) {
            assert_close(pair[1].0 - pair[0].0, fast);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reaches_steady_and_reports_phases() {
        let mut h = harness();
        h.transport.push(Inbound::Frame(subcommand_frame(
            Subcommand::EnableVibration.as_byte(),
            &[0x01],
        )));
        h.transport.push(Inbound::Frame(subcommand_frame(
            Subcommand::SetPlayerLights.as_byte(),
            &[0x01],
        )));
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(h.server.run(shutdown));

        tokio::time::sleep(Duration::from_secs(3)).await;
        stop.send(true).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(
            drain(&mut h.events),
            vec![
                SessionPhase::Handshaking,
                SessionPhase::Steady,
                SessionPhase::Closed
            ]
        );
        let writes = h.transport.writes();
        assert_eq!(writes[1].1[1], 0x21);
        assert_eq!(writes[1].1[15], 0x48);
        assert_eq!(writes[2].1[15], 0x30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eof_closes_session() {
        let mut h = harness();
        h.transport.push(Inbound::Eof);
        let (_stop, shutdown) = watch::channel(false);

        let result = h.server.run(shutdown).await;
        assert!(matches!(result, Err(SessionError::Disconnected)));
        assert_eq!(
            drain(&mut h.events),
            vec![SessionPhase::Handshaking, SessionPhase::Closed]
        );
        // Only the greeting went out
        assert_eq!(h.transport.write_count(), 1);
    }

    #[tokio::test]
    async fn test_handshake_error_escalation() {
        let mut h = harness();
        let now = Instant::now();
        h.transport.push(Inbound::Error(io::ErrorKind::ConnectionReset));
        h.transport.push(Inbound::Error(io::ErrorKind::ConnectionReset));
        h.transport.push(Inbound::Frame(typed_frame(OutputReportId::RumbleOnly)));
        h.transport.push(Inbound::Error(io::ErrorKind::ConnectionReset));
        h.transport.push(Inbound::Error(io::ErrorKind::ConnectionReset));
        h.transport.push(Inbound::Error(io::ErrorKind::ConnectionReset));

        for _ in 0..5 {
            assert_eq!(h.server.handshake_tick(now).unwrap(), Flow::Continue);
        }
        match h.server.handshake_tick(now) {
            Err(SessionError::Handshake { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source.kind(), io::ErrorKind::ConnectionReset);
            }
            other => panic!("expected handshake failure, got {:?}", other),
        }
        assert_eq!(h.transport.write_count(), 5);
    }

    #[tokio::test]
    async fn test_handshake_answers_invalid_frames() {
        let mut h = harness();
        let now = Instant::now();
        h.transport.push(Inbound::Frame(vec![0xA2; 10]));

        assert_eq!(h.server.handshake_tick(now).unwrap(), Flow::Continue);
        let writes = h.transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1[1], 0x30);
        assert_eq!(h.server.phase(), SessionPhase::Handshaking);
    }

    #[tokio::test]
    async fn test_steady_keepalive() {
        let mut h = harness();
        let now = Instant::now();
        for _ in 0..200 {
            assert_eq!(h.server.steady_tick(now), Flow::Continue);
        }
        assert_eq!(h.transport.write_count(), 200 / 132);
        assert!(h.pool.idle(SizeClass::Standard) >= 1);
    }

    #[tokio::test]
    async fn test_steady_dirty_forces_write() {
        let mut h = harness();
        let now = Instant::now();
        for tick in 1..=200 {
            if tick == 50 {
                h.controller.press(&[Button::A]);
            }
            h.server.steady_tick(now);
            if tick == 50 {
                assert_eq!(h.transport.write_count(), 1);
            }
        }

        // Tick 50 then a keepalive 132 ticks later
        let writes = h.transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1[4], 0x08);
        // Held buttons persist into keepalives
        assert_eq!(writes[1].1[4], 0x08);
        assert_eq!(h.server.session().buttons, [0x08, 0, 0]);
    }

    #[tokio::test]
    async fn test_steady_subcommand_writes_immediately() {
        let mut h = harness();
        let now = Instant::now();
        h.server.steady_tick(now);
        h.transport.push(Inbound::Frame(subcommand_frame(
            Subcommand::EnableImu.as_byte(),
            &[0x01],
        )));
        h.server.steady_tick(now);

        let writes = h.transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1[14], 0x80);
        assert_eq!(writes[0].1[15], 0x40);
        assert!(h.server.session().imu_enabled);
    }

    #[tokio::test]
    async fn test_steady_nfc_request_skips_tick() {
        let mut h = harness();
        let now = Instant::now();
        h.controller.press(&[Button::Home]);
        let mut frame = typed_frame(OutputReportId::RequestNfcData);
        frame[11] = 0x02;
        h.transport.push(Inbound::Frame(frame));

        h.server.steady_tick(now);
        assert_eq!(h.transport.write_count(), 0);
        assert_eq!(h.nfc.lock().requests(), 1);
        assert_eq!(h.nfc.lock().last_command(), Some(0x02));
        // The pending press is pushed on the next tick
        h.server.steady_tick(now);
        assert_eq!(h.transport.write_count(), 1);
        assert_eq!(h.transport.writes()[0].1[5], 0x10);
    }

    #[tokio::test]
    async fn test_steady_read_error_skips_tick() {
        let mut h = harness();
        let now = Instant::now();
        h.controller.press(&[Button::B]);
        h.transport.push(Inbound::Error(io::ErrorKind::BrokenPipe));

        assert_eq!(h.server.steady_tick(now), Flow::Continue);
        assert_eq!(h.transport.write_count(), 0);
        assert!(h.controller.snapshot().is_dirty());

        h.transport.push(Inbound::Eof);
        assert_eq!(h.server.steady_tick(now), Flow::Closed);
    }

    #[tokio::test]
    async fn test_steady_read_errors_still_keepalive() {
        let mut h = harness();
        let now = Instant::now();
        let keepalive = h.server.config.keepalive_ticks;
        for _ in 0..keepalive {
            h.transport.push(Inbound::Error(io::ErrorKind::BrokenPipe));
        }

        for _ in 0..keepalive - 1 {
            assert_eq!(h.server.steady_tick(now), Flow::Continue);
        }
        assert_eq!(h.transport.write_count(), 0);
        assert_eq!(h.server.steady_tick(now), Flow::Continue);
        assert_eq!(h.transport.write_count(), 1);
        assert_eq!(h.transport.writes()[0].1[1], 0x30);

        // The counter restarts after the keepalive
        h.server.steady_tick(now);
        assert_eq!(h.transport.write_count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_over_stream_with_coalesced_frames() {
        use crate::infrastructure::bluetooth::connection::StreamTransport;
        use std::io::{Read, Write};
        use std::os::unix::net::UnixStream;

        let (ours, theirs) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let transport: Arc<dyn ReportTransport> = Arc::new(StreamTransport::new(ours));
        let (tx, _events) = mpsc::unbounded_channel();
        let mut server = SessionServer::new(
            transport,
            SubcommandEngine::new(Arc::new(ReportPool::new()), SpiFlash::default()),
            ProtocolSession::new(MacAddress([0x98, 0xB6, 0xE9, 1, 2, 3])),
            ControllerHandle::new(),
            Box::new(AmiiboStub::new()),
            SessionConfig::default(),
            tx,
        );

        // Both subcommands land in the socket before the first read
        let mut both = subcommand_frame(Subcommand::EnableVibration.as_byte(), &[1]);
        both.extend(subcommand_frame(Subcommand::SetPlayerLights.as_byte(), &[1]));
        (&theirs).write_all(&both).unwrap();

        let now = Instant::now();
        for _ in 0..3 {
            server.handshake_tick(now).unwrap();
        }
        assert!(server.session().vibration_enabled);
        assert!(server.session().player_lights_assigned);
        assert_eq!(server.phase(), SessionPhase::Steady);

        let mut replies = [0u8; 3 * 50];
        (&theirs).read_exact(&mut replies).unwrap();
        assert_eq!(replies[15], Subcommand::EnableVibration.as_byte());
        assert_eq!(replies[50 + 15], Subcommand::SetPlayerLights.as_byte());
    }
}
