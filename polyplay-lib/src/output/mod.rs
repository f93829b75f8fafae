//! Mixed-output chain and the audio device seam.

pub mod chain;
pub mod sink;

pub use chain::{ClockCell, OutputChain};
pub use sink::{rodio_opener, AudioSink, RodioSink, SinkOpener};
