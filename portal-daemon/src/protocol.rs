//! Control protocol: one JSON object per line over `~/.portal/daemon.sock`.
//!
//! ```text
//! → {"cmd":"refresh","provider":"inventory"}
//! ← {"ok":true,"data":[{"provider":"inventory","outcome":"applied",...}]}
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

const STATUS_ATTEMPTS: u32 = 5;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(100);
const STATUS_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands understood by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    Status,
    /// Run a pass now; every provider when `provider` is absent.
    Refresh {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
    },
    Stop,
}

impl DaemonRequest {
    pub fn is_stop(&self) -> bool {
        matches!(self, DaemonRequest::Stop)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// The payload of a successful response, or the daemon's error message.
    pub fn into_result(self) -> Result<Value, DaemonError> {
        if self.ok {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        let message = self
            .error
            .unwrap_or_else(|| "daemon returned an error without a message".to_string());
        Err(DaemonError::Protocol(message))
    }
}

/// Blocking client for the control socket. Opens one connection per request.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket: PathBuf,
    read_timeout: Option<Duration>,
}

impl DaemonClient {
    pub fn at_home(home: &Path) -> Self {
        Self {
            socket: socket_path(home),
            read_timeout: None,
        }
    }

    /// Give up on a response after `timeout`. Unset means wait indefinitely.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn send(&self, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
        let mut stream = self.connect()?;
        stream
            .set_read_timeout(self.read_timeout)
            .map_err(|e| io_err(&self.socket, e))?;

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        stream
            .write_all(line.as_bytes())
            .map_err(|e| io_err(&self.socket, e))?;
        stream.flush().map_err(|e| io_err(&self.socket, e))?;

        let mut reply = String::new();
        let read = BufReader::new(stream)
            .read_line(&mut reply)
            .map_err(|e| io_err(&self.socket, e))?;
        if read == 0 {
            return Err(DaemonError::Protocol(
                "daemon closed connection before responding".to_string(),
            ));
        }
        Ok(serde_json::from_str(reply.trim_end())?)
    }

    /// `status`, tolerating a daemon that is still binding its socket.
    pub fn status(&self) -> Result<Value, DaemonError> {
        let mut attempt = 1;
        loop {
            match self.send(&DaemonRequest::Status) {
                Err(DaemonError::DaemonNotRunning { .. }) if attempt < STATUS_ATTEMPTS => {
                    attempt += 1;
                    sleep(STATUS_RETRY_DELAY);
                }
                other => return other?.into_result(),
            }
        }
    }

    pub fn stop(&self) -> Result<(), DaemonError> {
        self.send(&DaemonRequest::Stop)?.into_result().map(drop)
    }

    pub fn refresh(&self, provider: Option<String>) -> Result<Value, DaemonError> {
        self.send(&DaemonRequest::Refresh { provider })?.into_result()
    }

    fn connect(&self) -> Result<UnixStream, DaemonError> {
        let not_running = || DaemonError::DaemonNotRunning {
            socket: self.socket.clone(),
        };
        if !self.socket.exists() {
            return Err(not_running());
        }
        UnixStream::connect(&self.socket).map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                not_running()
            }
            _ => io_err(&self.socket, err),
        })
    }
}

pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    DaemonClient::at_home(home)
        .with_read_timeout(STATUS_READ_TIMEOUT)
        .status()
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    DaemonClient::at_home(home).stop()
}

/// Ask the daemon to run a pass now for one provider, or all when `None`.
pub fn request_refresh(home: &Path, provider: Option<String>) -> Result<Value, DaemonError> {
    DaemonClient::at_home(home).refresh(provider)
}
