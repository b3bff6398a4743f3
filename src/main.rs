use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use pro_controller_emu::domain::controller::ControllerHandle;
use pro_controller_emu::domain::models::SessionEvent;
use pro_controller_emu::domain::nfc::AmiiboStub;
use pro_controller_emu::domain::session::{MacAddress, ProtocolSession};
use pro_controller_emu::domain::settings::{Settings, SettingsService};
use pro_controller_emu::error::SessionError;
use pro_controller_emu::infrastructure::bluetooth::connection::{ConnectionConfig, ReportTransport};
use pro_controller_emu::infrastructure::bluetooth::engine::SubcommandEngine;
use pro_controller_emu::infrastructure::bluetooth::pool::ReportPool;
use pro_controller_emu::infrastructure::bluetooth::spi_flash::SpiFlash;
use pro_controller_emu::infrastructure::bluetooth::{SessionConfig, SessionServer};
use pro_controller_emu::infrastructure::logging::init_logger;
use pro_controller_emu::input_client::InputClient;
use pro_controller_emu::input_worker::InputWorker;

#[derive(Parser)]
#[command(name = "pro-controller-emu", version, about = "Pro Controller Bluetooth HID emulator")]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for the console and run the controller session
    Run {
        /// Override the controller MAC address
        #[arg(long)]
        mac: Option<MacAddress>,
    },
    /// Press buttons on a running emulator
    Press {
        #[arg(required = true)]
        buttons: Vec<String>,
    },
    /// Release buttons on a running emulator
    Release {
        #[arg(required = true)]
        buttons: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match cli.config {
        Some(path) => SettingsService::open(path),
        None => SettingsService::new()?,
    }
    .get()
    .clone();

    match cli.command {
        Command::Run { mac } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            let result = runtime.block_on(run(settings, mac));
            // The endpoint acceptor may still be blocked in accept()
            runtime.shutdown_timeout(Duration::from_millis(100));
            result
        }
        Command::Press { buttons } => {
            let mut client = InputClient::new(settings.input_socket_name);
            println!("{}", client.press(&buttons)?);
            Ok(())
        }
        Command::Release { buttons } => {
            let mut client = InputClient::new(settings.input_socket_name);
            println!("{}", client.release(&buttons)?);
            Ok(())
        }
    }
}

async fn run(mut settings: Settings, mac: Option<MacAddress>) -> Result<()> {
    if let Some(mac) = mac {
        settings.mac_address = mac;
    }
    let _log_guard = init_logger(&settings.log_settings)?;
    info!("Starting Pro Controller emulator as {}", settings.mac_address);

    let controller = ControllerHandle::new();
    InputWorker::new(settings.input_socket_name.clone(), controller.clone()).spawn()?;

    let config = ConnectionConfig::from_settings(&settings);
    let (transport, _control) = tokio::select! {
        accepted = tokio::task::spawn_blocking(move || accept(&config)) => {
            accepted.context("Endpoint acceptor panicked")??
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted while waiting for the console");
            return Ok(());
        }
    };
    info!("Console connected");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine = SubcommandEngine::new(
        Arc::new(ReportPool::new()),
        SpiFlash::new(settings.stick_calibration),
    );
    let nfc = Arc::new(Mutex::new(AmiiboStub::new()));
    let server = SessionServer::new(
        transport,
        engine,
        ProtocolSession::new(settings.mac_address),
        controller,
        Box::new(nfc.clone()),
        SessionConfig::from_settings(&settings),
        events_tx,
    );
    let mut session = tokio::spawn(server.run(shutdown_rx));

    loop {
        tokio::select! {
            Some(SessionEvent::Status(phase)) = events_rx.recv() => {
                info!("Session {}", phase);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                let _ = shutdown_tx.send(true);
            }
            result = &mut session => {
                while let Ok(SessionEvent::Status(phase)) = events_rx.try_recv() {
                    info!("Session {}", phase);
                }
                let (requests, last_command) = {
                    let nfc = nfc.lock();
                    (nfc.requests(), nfc.last_command())
                };
                if requests > 0 {
                    info!("Ignored {} NFC requests (last command {:02X?})", requests, last_command);
                }
                return match result.context("Session task panicked")? {
                    Ok(()) => Ok(()),
                    Err(SessionError::Disconnected) => {
                        info!("Console disconnected");
                        Ok(())
                    }
                    Err(e) => {
                        error!("Session failed: {}", e);
                        Err(e.into())
                    }
                };
            }
        }
    }
}

#[cfg(unix)]
fn accept(config: &ConnectionConfig) -> Result<(Arc<dyn ReportTransport>, std::os::unix::net::UnixStream)> {
    use pro_controller_emu::infrastructure::bluetooth::connection::Endpoints;

    let endpoints = Endpoints::accept(config)?;
    let interrupt: Arc<dyn ReportTransport> = Arc::new(endpoints.interrupt);
    Ok((interrupt, endpoints.control))
}

#[cfg(not(unix))]
fn accept(_config: &ConnectionConfig) -> Result<(Arc<dyn ReportTransport>, ())> {
    anyhow::bail!("Console endpoints are Unix sockets; this platform is not supported")
}
