//! Socket location and daemon configuration.
//!
//! The relay socket lives at `$XDG_RUNTIME_DIR/deeplinkd/relay.sock`
//! unless `--socket` overrides it. Daemon and clients resolve it the
//! same way.

use std::path::PathBuf;

/// Directory under `$XDG_RUNTIME_DIR` holding the socket.
pub const SOCKET_DIR: &str = "deeplinkd";

/// Socket file name.
pub const SOCKET_NAME: &str = "relay.sock";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("$XDG_RUNTIME_DIR is not set (use --socket to choose a path)")]
    NoRuntimeDir,
}

/// Daemon configuration, built from the `broker` subcommand.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub socket_path: PathBuf,
    /// File a platform launcher writes the cold-start intent URL to.
    /// Read lazily by `getInitialDeepLink`.
    pub intent_file: Option<PathBuf>,
}

/// Resolve the socket path: explicit override, else `$XDG_RUNTIME_DIR`.
pub fn resolve_socket_path(override_path: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = override_path {
        return Ok(path);
    }
    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").ok_or(ConfigError::NoRuntimeDir)?;
    Ok(socket_path_in(PathBuf::from(runtime_dir)))
}

fn socket_path_in(runtime_dir: PathBuf) -> PathBuf {
    runtime_dir.join(SOCKET_DIR).join(SOCKET_NAME)
}
