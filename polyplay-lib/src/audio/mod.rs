//! PCM primitives shared by the source, mix and output chains.

pub mod buffer;
pub mod convert;
pub mod format;
pub mod level;

pub use buffer::{PcmBuffer, ReadOutcome, ReadTimeout, SharedPcmBuffer};
pub use format::AudioFormat;
