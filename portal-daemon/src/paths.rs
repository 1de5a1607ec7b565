use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// Selects the log formatter: `json` for JSON lines, anything else for text.
pub const LOG_FORMAT_ENV: &str = "PORTAL_LOG_FORMAT";

pub fn portal_root(home: &Path) -> PathBuf {
    home.join(".portal")
}

pub fn socket_path(home: &Path) -> PathBuf {
    portal_root(home).join(DAEMON_SOCKET)
}
