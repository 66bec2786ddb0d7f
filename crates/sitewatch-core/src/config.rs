//! JSON configuration files: SMTP relay credentials and per-event email
//! settings. Field names follow the PascalCase form operators already have
//! on disk; lowercase spellings are accepted as aliases.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};

const DEFAULT_SMTP_TIMEOUT_SECS: u64 = 30;

fn default_smtp_timeout() -> u64 {
    DEFAULT_SMTP_TIMEOUT_SECS
}

/// Outbound mail relay. Immutable for the run.
#[derive(Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct SmtpConfig {
    #[serde(alias = "host")]
    pub host: String,
    #[serde(alias = "port")]
    pub port: u16,
    #[serde(alias = "username")]
    pub username: String,
    #[serde(alias = "password")]
    pub password: String,
    /// Deadline in seconds applied to connect and to every protocol reply.
    #[serde(alias = "timeout", default = "default_smtp_timeout")]
    pub timeout: u64,
    /// EHLO name; defaults to the local hostname.
    #[serde(alias = "helo_name", default)]
    pub helo_name: Option<String>,
}

impl SmtpConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: SmtpConfig = load_json(path)?;
        if config.host.trim().is_empty() {
            return Err(config_error(path, "Host is empty"));
        }
        if config.port == 0 {
            return Err(config_error(path, "Port must be non-zero"));
        }
        Ok(config)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }
}

// Keeps the password out of logs.
impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout", &self.timeout)
            .field("helo_name", &self.helo_name)
            .finish()
    }
}

/// Message settings for one notification event.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct EmailConfig {
    #[serde(alias = "subject")]
    pub subject: String,
    #[serde(alias = "from")]
    pub from: String,
    #[serde(alias = "to")]
    pub to: Vec<String>,
    /// Template files, concatenated in order into one body template.
    #[serde(alias = "body_tmpl")]
    pub body_tmpl: Vec<PathBuf>,
}

impl EmailConfig {
    /// Load and validate. Relative template paths are resolved against the
    /// directory holding the config file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: EmailConfig = load_json(path)?;
        if config.to.is_empty() {
            return Err(config_error(path, "To has no recipients"));
        }
        if config.body_tmpl.is_empty() {
            return Err(config_error(path, "BodyTmpl lists no template files"));
        }
        if let Some(base) = path.parent() {
            for tmpl in &mut config.body_tmpl {
                if tmpl.is_relative() {
                    *tmpl = base.join(&*tmpl);
                }
            }
        }
        Ok(config)
    }
}

/// Read a JSON file into `T`. Every failure is an `Error::Config`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| config_error(path, e))?;
    serde_json::from_str(&content).map_err(|e| config_error(path, e))
}

fn config_error(path: &Path, message: impl ToString) -> Error {
    Error::Config {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}
