use crate::input_worker::{InputCommand, InputResponse};
use anyhow::Result;
use interprocess::local_socket::{traits::Stream, GenericNamespaced, Stream as LocalStream, ToNsName};
use std::io::{BufRead, BufReader, Write};
use tracing::debug;

/// Client side of the input command channel
pub struct InputClient {
    socket_name: String,
    stream: Option<BufReader<LocalStream>>,
}

impl InputClient {
    pub fn new(socket_name: impl Into<String>) -> Self {
        Self {
            socket_name: socket_name.into(),
            stream: None,
        }
    }

    /// Try to connect to a running emulator.
    /// If it is not running, returns Ok(false).
    pub fn try_connect(&mut self) -> Result<bool> {
        if self.stream.is_some() {
            return Ok(true);
        }

        let name = self.socket_name.as_str().to_ns_name::<GenericNamespaced>()?;
        match LocalStream::connect(name) {
            Ok(stream) => {
                debug!("Connected to input channel {}", self.socket_name);
                self.stream = Some(BufReader::new(stream));
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Wait for the worker to become available (polling)
    pub fn wait_for_worker(&mut self, timeout_ms: u64) -> Result<bool> {
        let start = std::time::Instant::now();
        while start.elapsed() < std::time::Duration::from_millis(timeout_ms) {
            if self.try_connect().unwrap_or(false) {
                return Ok(true);
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        Ok(false)
    }

    /// Send a command and wait for its response
    pub fn send_command(&mut self, cmd: InputCommand) -> Result<InputResponse> {
        if !self.try_connect()? {
            anyhow::bail!("Emulator is not running (no input channel at {})", self.socket_name);
        }
        let Some(stream) = self.stream.as_mut() else {
            anyhow::bail!("Not connected to input channel");
        };

        let json_cmd = serde_json::to_string(&cmd)? + "\n";
        stream.get_mut().write_all(json_cmd.as_bytes())?;
        stream.get_mut().flush()?;

        let mut buffer = String::new();
        if stream.read_line(&mut buffer)? == 0 {
            self.stream = None;
            anyhow::bail!("Input channel closed");
        }

        let response: InputResponse = serde_json::from_str(&buffer)?;
        Ok(response)
    }

    pub fn press<S: AsRef<str>>(&mut self, buttons: &[S]) -> Result<String> {
        let names = buttons.iter().map(|b| b.as_ref().to_string()).collect();
        match self.send_command(InputCommand::Press(names))? {
            InputResponse::Success(msg) => Ok(msg),
            InputResponse::Error(e) => anyhow::bail!("Press failed: {}", e),
            _ => anyhow::bail!("Unexpected response"),
        }
    }

    pub fn release<S: AsRef<str>>(&mut self, buttons: &[S]) -> Result<String> {
        let names = buttons.iter().map(|b| b.as_ref().to_string()).collect();
        match self.send_command(InputCommand::Release(names))? {
            InputResponse::Success(msg) => Ok(msg),
            InputResponse::Error(e) => anyhow::bail!("Release failed: {}", e),
            _ => anyhow::bail!("Unexpected response"),
        }
    }
}
