use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Pin resource error at {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create event multiplexer: {0}")]
    Multiplexer(#[source] io::Error),
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] io::Error),
    #[error("Already initialized: {0}")]
    AlreadyInitialized(&'static str),
    #[error("Not initialized: {0}")]
    NotInitialized(&'static str),
    #[error("Interrupt registration failed for fd {fd}: {source}")]
    RegistrationFailed {
        fd: RawFd,
        #[source]
        source: io::Error,
    },
    #[error("Event wait failed: {0}")]
    WaitFailed(#[source] io::Error),
    #[error("No pin registered for fd {0}")]
    NotFound(RawFd),
    #[error("Pin registry full ({0} pins)")]
    RegistryFull(usize),
    #[error("Interrupt router terminated: {0}")]
    RouterTerminated(String),
}

impl GpioError {
    pub(crate) fn resource(path: impl Into<PathBuf>, source: io::Error) -> Self {
        GpioError::Resource {
            path: path.into(),
            source,
        }
    }
}
