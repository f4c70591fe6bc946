use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Cannot communicate with dashcam at address {address}: {message}")]
    Connectivity { address: String, message: String },

    #[error("Unexpected response from dashcam at {url}: {message}")]
    Protocol { url: String, message: String },

    #[error("Could not download recording file {filename}: status code {status}")]
    RemoteFile { filename: String, status: u16 },

    #[error("Another instance is already running for destination: {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Not enough disk space left: {used_percent:.1}% used, max used disk space percentage allowed: {max_percent}%")]
    DiskFull { used_percent: f64, max_percent: u8 },

    #[error("Destination error: {message}")]
    Destination { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// How a run-ending error is reported and which exit code it maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected operational condition, e.g. the dashcam is asleep
    Warning,
    /// Misconfiguration or unsafe situation requiring operator attention
    Fatal,
    /// A bug rather than an operational condition
    Internal,
}

impl SyncError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(config::ConfigError::Message(message.into()))
    }

    pub fn destination<S: Into<String>>(message: S) -> Self {
        Self::Destination {
            message: message.into(),
        }
    }

    pub fn connectivity<A: Into<String>, M: Into<String>>(address: A, message: M) -> Self {
        Self::Connectivity {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Connectivity { .. } | Self::AlreadyRunning(_) => ErrorClass::Warning,
            Self::Config(_)
            | Self::DiskFull { .. }
            | Self::Destination { .. }
            | Self::Protocol { .. }
            | Self::Url(_) => ErrorClass::Fatal,
            Self::Io(_) | Self::RemoteFile { .. } => ErrorClass::Internal,
        }
    }

    /// Process exit code; cron mode silences warnings so routine unavailability doesn't alert
    pub fn exit_code(&self, cron: bool) -> i32 {
        match self.class() {
            ErrorClass::Warning if cron => 0,
            ErrorClass::Warning => 1,
            ErrorClass::Fatal => 2,
            ErrorClass::Internal => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
