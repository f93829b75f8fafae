//! Stream format reported by decoders and negotiated with the sink.

use std::fmt::{Display, Formatter};

/// Sample rate, bit depth and channel count of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
        }
    }
}

impl Display for AudioFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz / {} bit / {} ch",
            self.sample_rate, self.bits_per_sample, self.channels
        )
    }
}
