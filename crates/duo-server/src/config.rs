//! Server configuration: TOML file + CLI overrides.

use crate::session::DEFAULT_OUTBOUND_QUEUE;
use duo_core::{DuoError, DuoResult, DEFAULT_HOST, DEFAULT_PORT};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_frame_size: default_max_frame_size(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_max_frame_size() -> usize {
    1_048_576
}
fn default_outbound_queue() -> usize {
    DEFAULT_OUTBOUND_QUEUE
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_size: usize,
    /// Messages buffered per connection before it counts as a stuck reader.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_section(ServerSection::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_host: Option<&str>,
        cli_port: Option<u16>,
        cli_max_frame_size: Option<usize>,
    ) -> DuoResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let mut config = Self::from_section(file_config.server);
        if let Some(host) = cli_host {
            config.host = host.to_string();
        }
        if let Some(port) = cli_port {
            config.port = port;
        }
        if let Some(size) = cli_max_frame_size {
            config.max_frame_size = size;
        }
        Ok(config)
    }

    fn parse(content: &str) -> DuoResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| DuoError::Config(format!("config parse error: {e}")))
    }

    fn from_section(section: ServerSection) -> Self {
        Self {
            host: section.host,
            port: section.port,
            max_frame_size: section.max_frame_size,
            outbound_queue: section.outbound_queue.max(1),
        }
    }

    /// The socket address to listen on.
    pub fn bind_addr(&self) -> DuoResult<SocketAddr> {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("{host}:{}", self.port)
            .parse()
            .map_err(|e| DuoError::Config(format!("invalid address {}:{}: {e}", self.host, self.port)))
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_listen_on_8765() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr().unwrap(), "0.0.0.0:8765".parse().unwrap());
        assert_eq!(config.max_frame_size, 1_048_576);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = ServerConfig::load(Some(&path), None, None, None).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn file_then_cli_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nhost = \"127.0.0.1\"\nport = 9000\nmax_frame_size = 4096").unwrap();

        let config = ServerConfig::load(Some(file.path()), None, None, None).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_frame_size, 4096);
        assert_eq!(config.outbound_queue, DEFAULT_OUTBOUND_QUEUE);

        let config = ServerConfig::load(Some(file.path()), None, Some(9100), None).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn zero_queue_is_raised_to_one() {
        let file = ServerConfig::parse("[server]\noutbound_queue = 0").unwrap();
        assert_eq!(ServerConfig::from_section(file.server).outbound_queue, 1);
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = ServerConfig::parse("[server]\nport = \"nope\"").unwrap_err();
        assert!(matches!(err, DuoError::Config(_)));
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let config = ServerConfig {
            host: "::1".into(),
            port: 8765,
            ..ServerConfig::default()
        };
        assert_eq!(config.bind_addr().unwrap(), "[::1]:8765".parse().unwrap());
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde_str("~/.duo/config.toml"), home.join(".duo/config.toml"));
        }
        assert_eq!(expand_tilde_str("/etc/duo.toml"), PathBuf::from("/etc/duo.toml"));
    }
}
