//! Shared mixer state mutated by the orchestrator and read by the mix thread.

use serde::{Deserialize, Serialize};

use crate::audio::format::AudioFormat;
use crate::audio::level::db_to_linear;

/// Operating mode of the downmixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkMode {
    /// Bypass: only the primary input is forwarded.
    Priming,
    /// Every input is read and summed with its mixing gain.
    Active,
}

/// Channel layout written to the mixed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputChannelMode {
    /// Keep the negotiated channel layout.
    #[default]
    Source,
    /// Fold each frame to its channel average, duplicated on every channel.
    Mono,
}

/// Two-level gain of one mixer input, in dB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotGain {
    pub priming_db: f32,
    pub mixing_db: f32,
}

impl SlotGain {
    pub fn new(priming_db: f32, mixing_db: f32) -> Self {
        Self {
            priming_db,
            mixing_db,
        }
    }

    pub fn priming_linear(&self) -> f32 {
        db_to_linear(self.priming_db)
    }

    pub fn mixing_linear(&self) -> f32 {
        db_to_linear(self.mixing_db)
    }
}

/// Snapshot of everything the mix loop needs per cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MixerState {
    pub mode: WorkMode,
    pub timeouts_ms: Vec<u64>,
    pub gains: Vec<SlotGain>,
    pub output_channels: OutputChannelMode,
    pub transit_ms: u64,
    /// Format the mixer was activated with; `None` while priming.
    pub format: Option<AudioFormat>,
}

impl MixerState {
    /// Initial state: priming, every input waiting with `initial_timeout_ms`.
    pub fn new(
        gains: Vec<SlotGain>,
        initial_timeout_ms: u64,
        output_channels: OutputChannelMode,
        transit_ms: u64,
    ) -> Self {
        Self {
            mode: WorkMode::Priming,
            timeouts_ms: vec![initial_timeout_ms; gains.len()],
            gains,
            output_channels,
            transit_ms,
            format: None,
        }
    }

    pub fn input_count(&self) -> usize {
        self.gains.len()
    }
}

/// Linear gain ramp applied after activation.
///
/// The primary input starts from its priming level, overlays start from
/// silence; every slot reaches its mixing level after `total_frames`.
#[derive(Debug, Clone)]
pub struct GainRamp {
    from: Vec<f32>,
    to: Vec<f32>,
    total_frames: u64,
    elapsed_frames: u64,
}

impl GainRamp {
    pub fn new(gains: &[SlotGain], transit_ms: u64, sample_rate: u32) -> Self {
        let from = gains
            .iter()
            .enumerate()
            .map(|(slot, gain)| if slot == 0 { gain.priming_linear() } else { 0.0 })
            .collect();
        let to = gains.iter().map(SlotGain::mixing_linear).collect();
        Self {
            from,
            to,
            total_frames: transit_ms * sample_rate as u64 / 1000,
            elapsed_frames: 0,
        }
    }

    /// Gain of `slot` at the current ramp position.
    pub fn gain(&self, slot: usize) -> f32 {
        let target = self.to.get(slot).copied().unwrap_or(0.0);
        if self.is_complete() {
            return target;
        }
        let start = self.from.get(slot).copied().unwrap_or(0.0);
        let progress = self.elapsed_frames as f32 / self.total_frames as f32;
        start + (target - start) * progress
    }

    pub fn advance(&mut self, frames: usize) {
        self.elapsed_frames = (self.elapsed_frames + frames as u64).min(self.total_frames);
    }

    pub fn is_complete(&self) -> bool {
        self.elapsed_frames >= self.total_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains() -> Vec<SlotGain> {
        vec![SlotGain::new(0.0, 0.0), SlotGain::new(-10.0, -20.0)]
    }

    #[test]
    fn zero_transit_jumps_to_mixing_levels() {
        let ramp = GainRamp::new(&gains(), 0, 48_000);
        assert!(ramp.is_complete());
        assert!((ramp.gain(1) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn ramp_fades_overlays_in_from_silence() {
        let mut ramp = GainRamp::new(&gains(), 10, 48_000);
        assert_eq!(ramp.gain(1), 0.0);
        assert!((ramp.gain(0) - 1.0).abs() < 1e-6);
        ramp.advance(240);
        assert!((ramp.gain(1) - 0.05).abs() < 1e-6);
        ramp.advance(10_000);
        assert!(ramp.is_complete());
        assert!((ramp.gain(1) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn output_mode_parses_lowercase() {
        let mode: OutputChannelMode = serde_json::from_str("\"mono\"").expect("mode");
        assert_eq!(mode, OutputChannelMode::Mono);
    }
}
