use crate::constants::*;
use crate::error::{Result as ServerResult, ServerError};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Effective parameters for one listener.
///
/// Every field has a default so a TOML file may set any subset; the command
/// line then overrides whatever the file provided.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub datadir: PathBuf,
    pub post_processing: Option<PathBuf>,
    pub max_connections: usize,
    pub read_timeout_secs: u64,
    pub max_message_size: Option<usize>,
    pub post_processing_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            datadir: PathBuf::new(),
            post_processing: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            max_message_size: None,
            post_processing_timeout_secs: DEFAULT_POST_PROCESSING_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Config for `host:port` writing under `datadir`, everything else default
    pub fn new(host: impl Into<String>, port: u16, datadir: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            datadir: datadir.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.host.trim().is_empty() {
            return Err(ServerError::Config("host is required".to_string()));
        }
        if self.datadir.as_os_str().is_empty() {
            return Err(ServerError::Config("datadir is required".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ServerError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if let Some(cmd) = &self.post_processing {
            if !cmd.exists() {
                return Err(ServerError::Config(format!(
                    "post-processing command not found: {}",
                    cmd.display()
                )));
            }
        }
        Ok(())
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.datadir.join(INBOX_DIR_NAME)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.datadir.join(ARCHIVE_DIR_NAME)
    }

    /// Create the data directory and its inbox and archive subdirectories.
    pub fn prepare_dirs(&self) -> ServerResult<()> {
        for dir in [self.datadir.clone(), self.inbox_dir(), self.archive_dir()] {
            fs::create_dir_all(&dir)
                .map_err(|source| ServerError::Directory { path: dir, source })?;
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.read_timeout_secs)
    }

    pub fn post_processing_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.post_processing_timeout_secs)
    }

    /// `host:port` for log lines; IPv6 literals get brackets
    pub fn display_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
