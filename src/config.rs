//! Sync configuration loading and validation.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default location of the configuration file, relative to `$HOME`.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/ingram-sync/config.json";

/// Connection settings handed to each remote connection at creation time.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl RemoteCredentials {
    /// `host:port` string suitable for `ToSocketAddrs`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for a sync run.
///
/// # Example
///
/// ```
/// use ingram_sync::SyncConfig;
///
/// let config: SyncConfig = serde_json::from_str(
///     r#"{ "host": "ftp.example.com", "user": "u", "password": "p" }"#,
/// ).unwrap();
/// assert_eq!(config.port, 21);
/// assert_eq!(config.max_concurrent_downloads, 4);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote FTP host name.
    pub host: String,
    /// Remote FTP port (default: 21).
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Local mirror of the remote tree.
    pub download_dir: PathBuf,
    /// Where archives are unpacked.
    pub working_dir: PathBuf,
    /// Directory holding the download history log.
    pub log_dir: PathBuf,
    /// Maximum number of simultaneous transfers (default: 4).
    ///
    /// Each transfer holds its own FTP connection, so this is also the
    /// connection limit against the server.
    pub max_concurrent_downloads: usize,
    /// Cover image-size folder under `/Imageswk` (default: `J400w`).
    pub cover_folder: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 21,
            user: String::new(),
            password: String::new(),
            download_dir: PathBuf::from("~/ingram/downloads"),
            working_dir: PathBuf::from("~/ingram/working"),
            log_dir: PathBuf::from("~/ingram/logs"),
            max_concurrent_downloads: 4,
            cover_folder: "J400w".to_string(),
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("download_dir", &self.download_dir)
            .field("working_dir", &self.working_dir)
            .field("log_dir", &self.log_dir)
            .field("max_concurrent_downloads", &self.max_concurrent_downloads)
            .field("cover_folder", &self.cover_folder)
            .finish()
    }
}

impl SyncConfig {
    /// Reads a JSON configuration file, expands `~/` paths and validates it.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: SyncConfig = serde_json::from_str(&content)?;
        let config = config.expanded();
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Returns a copy with every `~/` path resolved against `$HOME`.
    pub fn expanded(mut self) -> Self {
        self.download_dir = expand_home(&self.download_dir);
        self.working_dir = expand_home(&self.working_dir);
        self.log_dir = expand_home(&self.log_dir);
        self
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.host.trim().is_empty() {
            return Err(SyncError::Config("host must not be empty".to_string()));
        }
        if self.max_concurrent_downloads == 0 {
            return Err(SyncError::Config(
                "max_concurrent_downloads must be greater than zero".to_string(),
            ));
        }
        if self.cover_folder.contains('/') {
            return Err(SyncError::Config(format!(
                "cover_folder must be a single folder name, got '{}'",
                self.cover_folder
            )));
        }
        Ok(())
    }

    /// Immutable connection settings for the connector.
    pub fn credentials(&self) -> RemoteCredentials {
        RemoteCredentials {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

/// Expands a leading `~/` against `$HOME`; other paths are returned as-is.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
