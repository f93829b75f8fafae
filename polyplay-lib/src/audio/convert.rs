//! Sample format conversion helpers for decoded packets.

use symphonia::core::audio::{AudioBufferRef, Signal};

/// Convert a signed 24-bit sample stored in an `i32` to `f32`.
pub fn convert_signed_24bit_to_f32(sample: i32) -> f32 {
    // The 24-bit sample lives in the least significant bits of the i32.
    let shifted_sample = sample << 8 >> 8;
    shifted_sample as f32 / 2f32.powi(23)
}

/// Convert an unsigned 24-bit sample stored in a `u32` to `f32`.
pub fn convert_unsigned_24bit_to_f32(sample: u32) -> f32 {
    let shifted_sample = sample as i32 - 2i32.pow(23);
    shifted_sample as f32 / 2f32.powi(23)
}

/// Convert a signed 16-bit sample to `f32`.
pub fn convert_signed_16bit_to_f32(sample: i16) -> f32 {
    sample as f32 / 2f32.powi(15)
}

/// Convert an unsigned 16-bit sample to `f32`.
pub fn convert_unsigned_16bit_to_f32(sample: u16) -> f32 {
    (sample as i32 - 2i32.pow(15)) as f32 / 2f32.powi(15)
}

/// Convert a signed 32-bit sample to `f32`.
pub fn convert_signed_32bit_to_f32(sample: i32) -> f32 {
    sample as f32 / 2f32.powi(31)
}

fn convert_unsigned_32bit_to_f32(sample: u32) -> f32 {
    (sample as i64 - 2i64.pow(31)) as f32 / 2f32.powi(31)
}

fn convert_signed_8bit_to_f32(sample: i8) -> f32 {
    sample as f32 / 2f32.powi(7)
}

fn convert_unsigned_8bit_to_f32(sample: u8) -> f32 {
    (sample as i16 - 2i16.pow(7)) as f32 / 2f32.powi(7)
}

/// Extract samples for a single channel from a decoded packet.
pub fn process_channel(decoded: &AudioBufferRef<'_>, channel: usize) -> Vec<f32> {
    match decoded {
        AudioBufferRef::U8(buf) => buf
            .chan(channel)
            .iter()
            .copied()
            .map(convert_unsigned_8bit_to_f32)
            .collect(),
        AudioBufferRef::S8(buf) => buf
            .chan(channel)
            .iter()
            .copied()
            .map(convert_signed_8bit_to_f32)
            .collect(),
        AudioBufferRef::U16(buf) => buf
            .chan(channel)
            .iter()
            .copied()
            .map(convert_unsigned_16bit_to_f32)
            .collect(),
        AudioBufferRef::S16(buf) => buf
            .chan(channel)
            .iter()
            .copied()
            .map(convert_signed_16bit_to_f32)
            .collect(),
        AudioBufferRef::U24(buf) => buf
            .chan(channel)
            .iter()
            .map(|s| convert_unsigned_24bit_to_f32(s.0))
            .collect(),
        AudioBufferRef::S24(buf) => buf
            .chan(channel)
            .iter()
            .map(|s| convert_signed_24bit_to_f32(s.0))
            .collect(),
        AudioBufferRef::U32(buf) => buf
            .chan(channel)
            .iter()
            .copied()
            .map(convert_unsigned_32bit_to_f32)
            .collect(),
        AudioBufferRef::S32(buf) => buf
            .chan(channel)
            .iter()
            .copied()
            .map(convert_signed_32bit_to_f32)
            .collect(),
        AudioBufferRef::F32(buf) => buf.chan(channel).to_vec(),
        AudioBufferRef::F64(buf) => buf.chan(channel).iter().map(|s| *s as f32).collect(),
    }
}

/// Flatten a decoded packet into interleaved `f32` samples.
pub fn interleave(decoded: &AudioBufferRef<'_>) -> Vec<f32> {
    let channels = decoded.spec().channels.count();
    let planes: Vec<Vec<f32>> = (0..channels)
        .map(|channel| process_channel(decoded, channel))
        .collect();
    let frames = planes.first().map(Vec::len).unwrap_or(0);

    let mut interleaved = Vec::with_capacity(frames * channels);
    for frame in 0..frames {
        for plane in &planes {
            interleaved.push(plane[frame]);
        }
    }
    interleaved
}

/// Native bit depth of a decoded packet's sample type.
pub fn bits_per_sample(decoded: &AudioBufferRef<'_>) -> u16 {
    match decoded {
        AudioBufferRef::U8(_) | AudioBufferRef::S8(_) => 8,
        AudioBufferRef::U16(_) | AudioBufferRef::S16(_) => 16,
        AudioBufferRef::U24(_) | AudioBufferRef::S24(_) => 24,
        AudioBufferRef::U32(_) | AudioBufferRef::S32(_) | AudioBufferRef::F32(_) => 32,
        AudioBufferRef::F64(_) => 64,
    }
}
