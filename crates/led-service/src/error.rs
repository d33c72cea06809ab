//! Error types for the LED service.

use std::path::PathBuf;

use ledbus::BusError;

/// Failure touching one of the LED's sysfs files.
#[derive(Debug, thiserror::Error)]
pub enum LedError {
    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Service startup steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStep {
    DeclareInterface,
    CreateObject,
    Start,
    RegisterObject,
    Connect,
    RequestName,
    BindSessionPort,
    Advertise,
}

impl std::fmt::Display for StartupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StartupStep::DeclareInterface => "declaring interface",
            StartupStep::CreateObject => "creating bus object",
            StartupStep::Start => "starting bus attachment",
            StartupStep::RegisterObject => "registering bus object",
            StartupStep::Connect => "connecting to router",
            StartupStep::RequestName => "requesting well-known name",
            StartupStep::BindSessionPort => "binding session port",
            StartupStep::Advertise => "advertising name",
        };
        f.write_str(text)
    }
}

/// Errors that stop the service
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{step} failed: {source}")]
    Startup {
        step: StartupStep,
        #[source]
        source: BusError,
    },
}

impl ServiceError {
    /// Process exit status for this failure.
    #[must_use]
    pub fn status(&self) -> u8 {
        match self {
            ServiceError::ConfigRead { .. } | ServiceError::ConfigParse { .. } => 1,
            ServiceError::Startup { source, .. } => source.status(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
