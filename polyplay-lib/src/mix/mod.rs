//! Weighted downmixing of the source buffers into one stream.

pub mod downmixer;
pub mod state;

pub use downmixer::Downmixer;
pub use state::{MixerState, OutputChannelMode, SlotGain, WorkMode};
