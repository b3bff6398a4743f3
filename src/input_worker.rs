use crate::domain::controller::{parse_buttons, ControllerHandle};
use anyhow::{Context, Result};
use interprocess::local_socket::{
    traits::ListenerExt, GenericNamespaced, ListenerOptions, Stream as LocalStream, ToNsName,
};
use interprocess::TryClone;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default local socket name when settings do not override it
pub const SOCKET_NAME: &str = "pro_controller_emu_input";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Ping,
    Press(Vec<String>),
    Release(Vec<String>),
    Quit,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum InputResponse {
    Pong,
    Success(String),
    Error(String),
}

/// Accepts button commands from other processes and applies them to the
/// shared controller state
pub struct InputWorker {
    socket_name: String,
    controller: ControllerHandle,
}

impl InputWorker {
    pub fn new(socket_name: impl Into<String>, controller: ControllerHandle) -> Self {
        Self {
            socket_name: socket_name.into(),
            controller,
        }
    }

    /// Bind the socket and serve clients on a background thread until a
    /// client sends `Quit`
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let name = self.socket_name.as_str().to_ns_name::<GenericNamespaced>()?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_sync()
            .with_context(|| format!("Failed to bind input socket {}", self.socket_name))?;
        info!("Input channel listening on {}", self.socket_name);

        let handle = std::thread::Builder::new()
            .name("input-worker".to_string())
            .spawn(move || {
                for conn in listener.incoming().filter_map(|x| x.ok()) {
                    debug!("Input client connected");
                    match handle_connection(conn, &self.controller) {
                        Ok(true) => {
                            info!("Input worker stopping");
                            break;
                        }
                        Ok(false) => debug!("Input client disconnected"),
                        Err(e) => error!("Input connection error: {}", e),
                    }
                }
            })?;
        Ok(handle)
    }
}

/// Serve one client. Returns `true` once the client asked the worker to quit.
fn handle_connection(mut stream: LocalStream, controller: &ControllerHandle) -> Result<bool> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut buffer = String::new();

    loop {
        buffer.clear();
        if reader.read_line(&mut buffer)? == 0 {
            return Ok(false);
        }

        let (response, quit) = match serde_json::from_str::<InputCommand>(&buffer) {
            Ok(cmd) => {
                debug!("Received command: {:?}", cmd);
                let quit = cmd == InputCommand::Quit;
                (execute_command(cmd, controller), quit)
            }
            Err(e) => {
                warn!("Bad input command {:?}: {}", buffer.trim_end(), e);
                (InputResponse::Error(format!("Bad command: {}", e)), false)
            }
        };

        let json = serde_json::to_string(&response)? + "\n";
        stream.write_all(json.as_bytes())?;
        stream.flush()?;

        if quit {
            return Ok(true);
        }
    }
}

/// Apply one command to the controller state
pub fn execute_command(cmd: InputCommand, controller: &ControllerHandle) -> InputResponse {
    match cmd {
        InputCommand::Ping => InputResponse::Pong,
        InputCommand::Press(names) => match parse_buttons(&names) {
            Ok(buttons) => {
                controller.press(&buttons);
                InputResponse::Success(format!("Pressed {}", names.join(" ")))
            }
            Err(e) => InputResponse::Error(e.to_string()),
        },
        InputCommand::Release(names) => match parse_buttons(&names) {
            Ok(buttons) => {
                controller.release(&buttons);
                InputResponse::Success(format!("Released {}", names.join(" ")))
            }
            Err(e) => InputResponse::Error(e.to_string()),
        },
        InputCommand::Quit => InputResponse::Success("Quitting".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::controller::Button;
    use crate::input_client::InputClient;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_execute_press_release() {
        let controller = ControllerHandle::new();

        let response = execute_command(InputCommand::Press(names(&["a", "ZL"])), &controller);
        assert_eq!(response, InputResponse::Success("Pressed a ZL".to_string()));
        assert!(controller.snapshot().is_pressed(Button::A));
        assert!(controller.snapshot().is_pressed(Button::ZL));

        execute_command(InputCommand::Release(names(&["A"])), &controller);
        assert!(!controller.snapshot().is_pressed(Button::A));
        assert!(controller.snapshot().is_pressed(Button::ZL));
    }

    #[test]
    fn test_execute_unknown_button_changes_nothing() {
        let controller = ControllerHandle::new();
        let response = execute_command(InputCommand::Press(names(&["A", "Turbo"])), &controller);
        assert!(matches!(response, InputResponse::Error(_)));
        assert!(!controller.snapshot().is_dirty());
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&InputCommand::Press(names(&["Home"]))).unwrap();
        assert_eq!(json, r#"{"Press":["Home"]}"#);
        assert_eq!(serde_json::to_string(&InputCommand::Ping).unwrap(), r#""Ping""#);
    }

    #[test]
    fn test_worker_round_trip() {
        let socket = format!("pce-input-test-{}", std::process::id());
        let controller = ControllerHandle::new();
        let worker = InputWorker::new(socket.clone(), controller.clone())
            .spawn()
            .unwrap();

        let mut client = InputClient::new(socket);
        assert!(client.wait_for_worker(2000).unwrap());
        assert_eq!(client.send_command(InputCommand::Ping).unwrap(), InputResponse::Pong);

        client.press(&["B"]).unwrap();
        assert!(controller.snapshot().is_pressed(Button::B));
        assert!(client.press(&["Nope"]).is_err());
        client.release(&["B"]).unwrap();
        assert!(!controller.snapshot().is_pressed(Button::B));

        client.send_command(InputCommand::Quit).unwrap();
        worker.join().unwrap();
    }
}
