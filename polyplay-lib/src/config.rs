//! Session configuration: media list, gain table and timing knobs.

use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::level::deserialize_db_gain;
use crate::constants::*;
use crate::error::PlaybackError;
use crate::mix::state::{OutputChannelMode, SlotGain};

fn deserialize_optional_gain<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_db_gain")] f32);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(db)| db))
}

/// One media item and its mixing gain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub path: PathBuf,
    /// Mixing gain in dB; the positional default applies when unset.
    #[serde(default, deserialize_with = "deserialize_optional_gain")]
    pub gain_db: Option<f32>,
}

impl SourceSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            gain_db: None,
        }
    }

    pub fn with_gain(mut self, gain_db: f32) -> Self {
        self.gain_db = Some(gain_db);
        self
    }
}

/// Static description of one playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub storage_root: PathBuf,
    pub sources: Vec<SourceSettings>,
    pub active_timeout_ms: u64,
    pub priming_timeout_ms: u64,
    pub buffer_samples: usize,
    pub mixed_buffer_samples: usize,
    pub mix_frames: usize,
    pub transit_ms: u64,
    pub output_channels: OutputChannelMode,
    pub mount_retries: u32,
    pub mount_retry_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("."),
            sources: Vec::new(),
            active_timeout_ms: DEFAULT_ACTIVE_TIMEOUT_MS,
            priming_timeout_ms: DEFAULT_PRIMING_TIMEOUT_MS,
            buffer_samples: DEFAULT_SOURCE_BUFFER_SAMPLES,
            mixed_buffer_samples: DEFAULT_MIXED_BUFFER_SAMPLES,
            mix_frames: DEFAULT_MIX_FRAMES,
            transit_ms: 0,
            output_channels: OutputChannelMode::default(),
            mount_retries: DEFAULT_MOUNT_RETRIES,
            mount_retry_ms: DEFAULT_MOUNT_RETRY_MS,
        }
    }
}

impl SessionConfig {
    /// Default configuration playing `sources` with positional gains.
    pub fn with_sources<I, P>(sources: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            sources: sources.into_iter().map(SourceSettings::new).collect(),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::NotFound`] if the file does not exist,
    /// [`PlaybackError::InvalidConfig`] if it does not parse.
    pub fn from_json_file(path: &Path) -> Result<Self, PlaybackError> {
        let raw = fs::read_to_string(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => PlaybackError::NotFound(path.to_path_buf()),
            _ => PlaybackError::Io(err),
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Mixing gain of source `index` in dB.
    ///
    /// Unset gains default to unity for the primary and an attenuated level
    /// for every overlay.
    pub fn gain_db(&self, index: usize) -> f32 {
        self.sources
            .get(index)
            .and_then(|source| source.gain_db)
            .unwrap_or(if index == 0 {
                DEFAULT_PRIMARY_GAIN_DB
            } else {
                DEFAULT_OVERLAY_GAIN_DB
            })
    }

    /// Two-level gain table handed to the downmixer.
    ///
    /// The primary plays at its own gain while priming; overlays are not
    /// heard until the mixer is active.
    pub fn slot_gains(&self) -> Vec<SlotGain> {
        (0..self.sources.len())
            .map(|index| {
                let mixing = self.gain_db(index);
                let priming = if index == 0 { mixing } else { f32::NEG_INFINITY };
                SlotGain::new(priming, mixing)
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), PlaybackError> {
        if self.sources.is_empty() {
            return Err(PlaybackError::InvalidConfig(
                "at least one source is required".to_string(),
            ));
        }
        if self.sources.len() > u16::MAX as usize {
            return Err(PlaybackError::InvalidConfig(format!(
                "{} sources exceed the supported maximum",
                self.sources.len()
            )));
        }
        for index in 0..self.sources.len() {
            let gain = self.gain_db(index);
            if gain > 0.0 || gain.is_nan() {
                return Err(PlaybackError::InvalidConfig(format!(
                    "gain of source {} must be 0 dB or lower, got {}",
                    index + 1,
                    gain
                )));
            }
        }
        if self.active_timeout_ms == 0 {
            return Err(PlaybackError::InvalidConfig(
                "active_timeout_ms must be positive".to_string(),
            ));
        }
        if self.mix_frames == 0 {
            return Err(PlaybackError::InvalidConfig(
                "mix_frames must be positive".to_string(),
            ));
        }
        if self.buffer_samples == 0 || self.mixed_buffer_samples == 0 {
            return Err(PlaybackError::InvalidConfig(
                "buffer sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_gain_defaults() {
        let config = SessionConfig::with_sources(["a.mp3", "b.mp3", "c.mp3"]);
        assert_eq!(config.gain_db(0), 0.0);
        assert_eq!(config.gain_db(1), -10.0);
        assert_eq!(config.gain_db(2), -10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_json_with_string_gains() {
        let config: SessionConfig = serde_json::from_str(
            r#"{
                "storage_root": "/media",
                "sources": [
                    { "path": "bed.mp3" },
                    { "path": "voice.mp3", "gain_db": "-6db" }
                ],
                "output_channels": "mono"
            }"#,
        )
        .expect("config");
        assert_eq!(config.storage_root, PathBuf::from("/media"));
        assert_eq!(config.gain_db(0), 0.0);
        assert_eq!(config.gain_db(1), -6.0);
        assert_eq!(config.active_timeout_ms, DEFAULT_ACTIVE_TIMEOUT_MS);
        assert_eq!(config.output_channels, OutputChannelMode::Mono);
    }

    #[test]
    fn rejects_boosts_and_empty_source_lists() {
        assert!(SessionConfig::default().validate().is_err());

        let mut config = SessionConfig::with_sources(["a.mp3"]);
        config.sources[0].gain_db = Some(3.0);
        assert!(matches!(
            config.validate(),
            Err(PlaybackError::InvalidConfig(_))
        ));

        let mut config = SessionConfig::with_sources(["a.mp3"]);
        config.active_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn overlays_are_silent_while_priming() {
        let gains = SessionConfig::with_sources(["a.mp3", "b.mp3"]).slot_gains();
        assert_eq!(gains[0].priming_db, 0.0);
        assert_eq!(gains[1].priming_linear(), 0.0);
        assert_eq!(gains[1].mixing_db, -10.0);
    }
}
