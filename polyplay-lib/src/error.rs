//! Error type shared by every playback component.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use crate::audio::format::AudioFormat;

/// Error type for session wiring, chain control and media access.
#[derive(Debug)]
pub enum PlaybackError {
    /// Storage is not mounted or a device/resource cannot be acquired yet.
    ResourceUnavailable(String),
    NotFound(PathBuf),
    Io(std::io::Error),
    Decode(String),
    UnsupportedFormat(String),
    InvalidConfig(String),
    InvalidInput(String),
    /// The output clock was already negotiated for this session.
    ClockAlreadyConfigured(AudioFormat),
    /// A pipeline operation was requested in a state that does not allow it.
    PipelineState(String),
    /// The event bus still has listeners attached.
    ListenersAttached(usize),
    Device(String),
}

impl Display for PlaybackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceUnavailable(what) => write!(f, "resource unavailable: {}", what),
            Self::NotFound(path) => write!(f, "file not found: {}", path.display()),
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Decode(err) => write!(f, "decode error: {}", err),
            Self::UnsupportedFormat(err) => write!(f, "unsupported format: {}", err),
            Self::InvalidConfig(err) => write!(f, "invalid config: {}", err),
            Self::InvalidInput(err) => write!(f, "invalid input: {}", err),
            Self::ClockAlreadyConfigured(format) => {
                write!(f, "output clock already configured as {}", format)
            }
            Self::PipelineState(err) => write!(f, "pipeline state: {}", err),
            Self::ListenersAttached(count) => {
                write!(f, "event bus still has {} listener(s) attached", count)
            }
            Self::Device(err) => write!(f, "output device error: {}", err),
        }
    }
}

impl std::error::Error for PlaybackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PlaybackError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<symphonia::core::errors::Error> for PlaybackError {
    fn from(value: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error;
        match value {
            Error::IoError(err) => Self::Io(err),
            Error::Unsupported(what) => Self::UnsupportedFormat(what.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PlaybackError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}
