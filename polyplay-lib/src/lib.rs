//! # Polyplay
//!
//! Concurrent multi-source audio playback. Several media files are decoded
//! in parallel source chains, blended by a weighted downmixer and rendered to
//! one output device. The [`session::Orchestrator`] wires the chains, reacts
//! to events on the [`events::EventBus`] and tears everything down in order.

pub mod audio;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod mix;
pub mod output;
pub mod pipeline;
pub mod probe;
pub mod session;
pub mod source;
pub mod storage;

pub use audio::format::AudioFormat;
pub use config::{SessionConfig, SourceSettings};
pub use error::PlaybackError;
pub use session::{Orchestrator, SessionSummary};
