//! Relay configuration: TOML file + CLI overrides.

use cqrelay_core::{RelayError, RelayResult};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub upload: UploadSection,
    #[serde(default)]
    pub log: LogSection,
}

/// `[server]` section: where bot clients connect.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Token clients must present as `Authorization: Bearer <token>`.
    #[serde(default)]
    pub access_token: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            access_token: String::new(),
        }
    }
}

/// `[upstream]` section: the OneBot implementation we dial.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamSection {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_mode: TokenMode,
}

/// How the upstream access token is presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenMode {
    #[default]
    Header,
    Query,
}

/// `[upload]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadSection {
    #[serde(default)]
    pub endpoint: String,
}

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file: Option<String>,
    /// Write to stdout; may be turned off when `file` is set.
    #[serde(default = "default_console")]
    pub console: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
            console: default_console(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_listen() -> String {
    "0.0.0.0:8081".to_string()
}
fn default_path() -> String {
    "/ws".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_console() -> bool {
    true
}

/// CLI values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub path: Option<String>,
    pub upstream_url: Option<String>,
    pub upload_endpoint: Option<String>,
    pub log_level: Option<String>,
}

/// Upstream authentication; header and query token are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamAuth {
    None,
    Bearer(String),
    Query(String),
}

/// Logging settings, consumed by [`crate::logging::init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    pub console: bool,
}

/// Resolved relay configuration (defaults filled, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub path: String,
    pub access_token: Option<String>,
    pub upstream_url: String,
    pub upstream_auth: UpstreamAuth,
    pub upload_endpoint: String,
    pub log: LogConfig,
}

impl RelayConfig {
    /// Load config from a TOML file (defaults when it does not exist), then
    /// apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| RelayError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::from_file(file_config, overrides)
    }

    /// Merge a parsed config file with CLI overrides and validate the result.
    pub fn from_file(file: ConfigFile, overrides: Overrides) -> RelayResult<Self> {
        let listen_str = overrides.listen.unwrap_or(file.server.listen);
        let listen = listen_str
            .parse::<SocketAddr>()
            .map_err(|e| {
                RelayError::Config(format!("invalid listen address {listen_str:?}: {e}"))
            })?;

        let path = overrides.path.unwrap_or(file.server.path);
        if !path.starts_with('/') {
            return Err(RelayError::Config(format!(
                "listen path must start with '/': {path:?}"
            )));
        }

        let upstream_url = overrides.upstream_url.unwrap_or(file.upstream.url);
        if !(upstream_url.starts_with("ws://") || upstream_url.starts_with("wss://")) {
            return Err(RelayError::Config(format!(
                "upstream url must be a ws:// or wss:// url, got {upstream_url:?}"
            )));
        }

        let upload_endpoint = overrides.upload_endpoint.unwrap_or(file.upload.endpoint);
        if !(upload_endpoint.starts_with("http://") || upload_endpoint.starts_with("https://")) {
            return Err(RelayError::Config(format!(
                "upload endpoint must be an http(s) url, got {upload_endpoint:?}"
            )));
        }

        let upstream_token = non_empty(file.upstream.access_token);
        let upstream_auth = match (upstream_token, file.upstream.token_mode) {
            (None, _) => UpstreamAuth::None,
            (Some(token), TokenMode::Header) => UpstreamAuth::Bearer(token),
            (Some(token), TokenMode::Query) => UpstreamAuth::Query(token),
        };

        if !file.log.console && file.log.file.is_none() {
            return Err(RelayError::Config(
                "log.console = false requires log.file".into(),
            ));
        }

        Ok(Self {
            listen,
            path,
            access_token: non_empty(file.server.access_token),
            upstream_url,
            upstream_auth,
            upload_endpoint,
            log: LogConfig {
                level: overrides.log_level.unwrap_or(file.log.level),
                format: file.log.format,
                file: file.log.file.as_deref().map(expand_tilde_str),
                console: file.log.console,
            },
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
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
