//! Decoder seam used by source chains, plus the symphonia-backed default.

use log::warn;
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::convert::{bits_per_sample, interleave};
use crate::audio::format::AudioFormat;
use crate::error::PlaybackError;

/// Bit depth reported when the container does not carry one (compressed
/// codecs such as MP3 decode to 16-bit PCM on the target device).
const FALLBACK_BITS_PER_SAMPLE: u16 = 16;

/// A stream decoder producing interleaved `f32` PCM.
pub trait SourceDecoder: Send {
    /// Parse stream headers and return the PCM format.
    fn probe(&mut self) -> Result<AudioFormat, PlaybackError>;

    /// Decode the next block of interleaved samples.
    ///
    /// # Returns
    ///
    /// `Ok(None)` at end of stream.
    fn decode(&mut self) -> Result<Option<Vec<f32>>, PlaybackError>;
}

/// Opens a decoder for a media file handed over by the storage reader.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, file: File, path: &Path) -> Result<Box<dyn SourceDecoder>, PlaybackError>;
}

/// Factory for [`SymphoniaDecoder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoderFactory;

impl DecoderFactory for SymphoniaDecoderFactory {
    fn open(&self, file: File, path: &Path) -> Result<Box<dyn SourceDecoder>, PlaybackError> {
        Ok(Box::new(SymphoniaDecoder::open(file, path)?))
    }
}

struct DecodedPacket {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
}

/// Decoder for any container/codec pair symphonia's default registry knows.
pub struct SymphoniaDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    codec_params: CodecParameters,
    probed: Option<AudioFormat>,
    pending: Option<Vec<f32>>,
}

impl SymphoniaDecoder {
    /// Probe the container and build a decoder for its first audio track.
    ///
    /// # Arguments
    ///
    /// * `file` - Open media file.
    /// * `path` - Path of `file`; its extension is used as a probe hint.
    pub fn open(file: File, path: &Path) -> Result<Self, PlaybackError> {
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(&extension.to_lowercase());
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = symphonia::default::get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                PlaybackError::UnsupportedFormat(format!(
                    "{}: no decodable audio track",
                    path.display()
                ))
            })?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let dec_opts: DecoderOptions = Default::default();
        let decoder = symphonia::default::get_codecs().make(&codec_params, &dec_opts)?;

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            codec_params,
            probed: None,
            pending: None,
        })
    }

    fn next_packet(&mut self) -> Result<Option<DecodedPacket>, PlaybackError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None)
                }
                Err(Error::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let samples = interleave(&decoded);
                    if samples.is_empty() {
                        continue;
                    }
                    return Ok(Some(DecodedPacket {
                        samples,
                        sample_rate: spec.rate,
                        channels: spec.channels.count() as u16,
                        bits_per_sample: bits_per_sample(&decoded),
                    }));
                }
                Err(Error::DecodeError(err)) => {
                    warn!("{}: skipping undecodable packet: {}", self.path.display(), err);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl SourceDecoder for SymphoniaDecoder {
    fn probe(&mut self) -> Result<AudioFormat, PlaybackError> {
        if let Some(format) = self.probed {
            return Ok(format);
        }

        let bits = self
            .codec_params
            .bits_per_sample
            .map(|bits| bits as u16)
            .unwrap_or(FALLBACK_BITS_PER_SAMPLE);

        let format = match (self.codec_params.sample_rate, self.codec_params.channels) {
            (Some(rate), Some(channels)) => AudioFormat::new(rate, bits, channels.count() as u16),
            _ => {
                // Headers are incomplete; the first decoded packet tells us.
                let Some(packet) = self.next_packet()? else {
                    return Err(PlaybackError::Decode(format!(
                        "{}: stream ended before any audio",
                        self.path.display()
                    )));
                };
                let bits = self
                    .codec_params
                    .bits_per_sample
                    .map(|bits| bits as u16)
                    .unwrap_or(packet.bits_per_sample);
                let format = AudioFormat::new(packet.sample_rate, bits, packet.channels);
                self.pending = Some(packet.samples);
                format
            }
        };

        self.probed = Some(format);
        Ok(format)
    }

    fn decode(&mut self) -> Result<Option<Vec<f32>>, PlaybackError> {
        if let Some(samples) = self.pending.take() {
            return Ok(Some(samples));
        }
        Ok(self.next_packet()?.map(|packet| packet.samples))
    }
}
