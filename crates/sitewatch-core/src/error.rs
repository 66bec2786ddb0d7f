use std::path::PathBuf;

use crate::types::SmtpStage;

/// Failure taxonomy shared by every sitewatch crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Config file missing, unreadable, or not valid JSON for its schema.
    #[error("config {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// Snapshot file could not be opened, read, or replaced.
    #[error("snapshot {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another run holds the snapshot lock.
    #[error("snapshot is locked by another run ({0})")]
    Locked(PathBuf),

    /// DNS, connect, timeout, non-2xx status, or body read failure.
    #[error("fetch {url}: {message}")]
    Fetch { url: String, message: String },

    /// The redaction filter could not complete.
    #[error("redaction: {0}")]
    Redaction(String),

    /// Body template could not be loaded, parsed, or expanded.
    #[error("template: {0}")]
    Template(String),

    /// Session-level SMTP failure (before any recipient was attempted).
    #[error("smtp {stage}: {message}")]
    Smtp { stage: SmtpStage, message: String },

    /// A recipient transaction failed; later recipients were not attempted.
    #[error(
        "smtp {stage} failed for recipient #{index} <{recipient}> after {delivered} delivered: {message}"
    )]
    PartialDelivery {
        delivered: usize,
        index: usize,
        recipient: String,
        stage: SmtpStage,
        message: String,
    },
}

impl Error {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn fetch(url: &str, message: impl ToString) -> Self {
        Error::Fetch {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub fn smtp(stage: SmtpStage, message: impl ToString) -> Self {
        Error::Smtp {
            stage,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
