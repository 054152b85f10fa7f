//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use termgate_core::TermgateResult;
use tracing::info;

use crate::session::ConnectOptions;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub cors: CorsSection,
    #[serde(default)]
    pub ssh: SshSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_addr: default_bind_addr(),
        }
    }
}

/// `[cors]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSection {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// `[ssh]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SshSection {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    #[serde(default = "default_rows")]
    pub default_rows: u16,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            term: default_term(),
            default_cols: default_cols(),
            default_rows: default_rows(),
        }
    }
}

fn default_port() -> u16 {
    8000
}
fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_term() -> String {
    "xterm-256color".to_string()
}
fn default_cols() -> u16 {
    120
}
fn default_rows() -> u16 {
    30
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    pub connect_timeout: Duration,
    pub term: String,
    pub default_cols: u16,
    pub default_rows: u16,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli_port: Option<u16>) -> TermgateResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content).map_err(|e| {
                    termgate_core::TermgateError::Other(format!("config parse error: {e}"))
                })?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        Ok(Self {
            port: cli_port.unwrap_or(file_config.server.port),
            bind_addr: file_config.server.bind_addr,
            allowed_origins: file_config.cors.allowed_origins,
            connect_timeout: Duration::from_secs(file_config.ssh.connect_timeout_secs),
            term: file_config.ssh.term,
            default_cols: file_config.ssh.default_cols,
            default_rows: file_config.ssh.default_rows,
        })
    }

    /// Connection parameters derived from the `[ssh]` section.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            term: self.term.clone(),
            cols: self.default_cols,
            rows: self.default_rows,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&s[2..]);
        }
    }
    PathBuf::from(s.into_owned())
}
