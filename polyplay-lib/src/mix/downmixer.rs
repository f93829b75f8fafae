//! Downmix engine: N buffered inputs in, one mixed buffer out.

use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::audio::buffer::{ReadOutcome, ReadTimeout, SharedPcmBuffer};
use crate::audio::format::AudioFormat;
use crate::error::PlaybackError;
use crate::events::{ElementStatus, Emitter, SourceId};
use crate::pipeline::PipelineTask;

use super::state::{GainRamp, MixerState, OutputChannelMode, WorkMode};

/// Pause while priming with a drained primary, waiting for activation.
const IDLE_WAIT: Duration = Duration::from_millis(10);

/// Mixer control surface.
///
/// Inputs are bound once at wiring time. Mode, timeouts and gains live in a
/// shared [`MixerState`] the mix thread snapshots every cycle, so control
/// calls never block on audio I/O.
pub struct Downmixer {
    inputs: Vec<Option<SharedPcmBuffer>>,
    state: Arc<Mutex<MixerState>>,
    output: SharedPcmBuffer,
    mix_frames: usize,
}

impl Downmixer {
    /// # Arguments
    ///
    /// * `state` - Initial state; its gain table fixes the input count.
    /// * `mix_frames` - Frames pulled from each input per cycle.
    /// * `output` - Buffer receiving the mixed stream.
    pub fn new(state: MixerState, mix_frames: usize, output: SharedPcmBuffer) -> Self {
        Self {
            inputs: vec![None; state.input_count()],
            state: Arc::new(Mutex::new(state)),
            output,
            mix_frames: mix_frames.max(1),
        }
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output(&self) -> SharedPcmBuffer {
        self.output.clone()
    }

    /// Copy of the current control state.
    pub fn state(&self) -> MixerState {
        self.state.lock().unwrap().clone()
    }

    pub fn mode(&self) -> WorkMode {
        self.state.lock().unwrap().mode
    }

    /// Attach a source buffer to input slot `index`.
    ///
    /// # Errors
    ///
    /// Out-of-range indexes and already bound slots are rejected.
    pub fn bind_input(&mut self, index: usize, buffer: SharedPcmBuffer) -> Result<(), PlaybackError> {
        let count = self.inputs.len();
        let slot = self.inputs.get_mut(index).ok_or_else(|| {
            PlaybackError::InvalidInput(format!(
                "mixer input {} out of range (0..{})",
                index, count
            ))
        })?;
        if slot.is_some() {
            return Err(PlaybackError::InvalidInput(format!(
                "mixer input {} is already bound",
                index
            )));
        }
        *slot = Some(buffer);
        Ok(())
    }

    /// Switch mode. The mixer never returns to priming once active.
    pub fn set_mode(&self, mode: WorkMode) -> Result<(), PlaybackError> {
        let mut state = self.state.lock().unwrap();
        if state.mode == WorkMode::Active && mode == WorkMode::Priming {
            return Err(PlaybackError::PipelineState(
                "mixer cannot return to priming".to_string(),
            ));
        }
        state.mode = mode;
        Ok(())
    }

    /// Set the read timeout of one input; `0` waits without bound.
    pub fn set_input_timeout(&self, index: usize, timeout_ms: u64) -> Result<(), PlaybackError> {
        let mut state = self.state.lock().unwrap();
        let count = state.timeouts_ms.len();
        let slot = state.timeouts_ms.get_mut(index).ok_or_else(|| {
            PlaybackError::InvalidInput(format!(
                "mixer input {} out of range (0..{})",
                index, count
            ))
        })?;
        *slot = timeout_ms;
        Ok(())
    }

    /// Leave priming: mode, format and every input timeout change together.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::PipelineState`] if the mixer is already active.
    pub fn activate(&self, timeout_ms: u64, format: AudioFormat) -> Result<(), PlaybackError> {
        let mut state = self.state.lock().unwrap();
        if state.mode == WorkMode::Active {
            return Err(PlaybackError::PipelineState(
                "mixer is already active".to_string(),
            ));
        }
        state.mode = WorkMode::Active;
        state.format = Some(format);
        state.timeouts_ms.iter_mut().for_each(|t| *t = timeout_ms);
        Ok(())
    }

    /// Build the mix worker; every input must be bound.
    pub fn task(&self, emitter: Emitter) -> Result<PipelineTask, PlaybackError> {
        let inputs = self
            .inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                input.clone().ok_or_else(|| {
                    PlaybackError::PipelineState(format!("mixer input {} is unbound", index))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if inputs.is_empty() {
            return Err(PlaybackError::InvalidInput(
                "mixer has no inputs".to_string(),
            ));
        }

        let task = MixTask {
            inputs,
            state: self.state.clone(),
            output: self.output.clone(),
            mix_frames: self.mix_frames,
            emitter,
        };
        Ok(PipelineTask::new("mix", move |abort| task.run(abort)))
    }
}

enum Step {
    Continue,
    Aborted,
}

struct MixTask {
    inputs: Vec<SharedPcmBuffer>,
    state: Arc<Mutex<MixerState>>,
    output: SharedPcmBuffer,
    mix_frames: usize,
    emitter: Emitter,
}

impl MixTask {
    fn run(self, abort: Arc<AtomicBool>) {
        self.emitter.report_status(ElementStatus::Running);
        let finished = self.mix(&abort);
        self.output.close();
        if finished {
            info!("mixer: every input drained");
            self.emitter.report_status(ElementStatus::Finished);
        } else {
            self.emitter.report_status(ElementStatus::Stopped);
        }
    }

    /// Returns `true` when every input drained, `false` on abort.
    fn mix(&self, abort: &AtomicBool) -> bool {
        let mut scratch: Vec<f32> = Vec::new();
        let mut mixed: Vec<f32> = Vec::new();
        let mut ramp: Option<GainRamp> = None;
        let mut starved = vec![false; self.inputs.len()];

        loop {
            if abort.load(Ordering::Relaxed) {
                return false;
            }
            if self.inputs.iter().all(|input| input.is_drained()) {
                return true;
            }

            let state = self.state.lock().unwrap().clone();
            let step = match state.mode {
                WorkMode::Priming => self.forward_primary(&state, &mut scratch, abort),
                WorkMode::Active => {
                    let ramp = ramp.get_or_insert_with(|| {
                        let (transit_ms, rate) = match state.format {
                            Some(format) => (state.transit_ms, format.sample_rate),
                            None => (0, 0),
                        };
                        GainRamp::new(&state.gains, transit_ms, rate)
                    });
                    self.mix_inputs(&state, ramp, &mut starved, &mut scratch, &mut mixed, abort)
                }
            };
            if let Step::Aborted = step {
                return false;
            }
        }
    }

    /// Bypass: pass the primary input through at its priming gain.
    fn forward_primary(&self, state: &MixerState, scratch: &mut Vec<f32>, abort: &AtomicBool) -> Step {
        let primary = &self.inputs[0];
        if primary.is_drained() {
            thread::sleep(IDLE_WAIT);
            return Step::Continue;
        }

        let frame_len = primary.frame_len();
        scratch.resize(self.mix_frames * frame_len, 0.0);
        let timeout = ReadTimeout::from_ms(state.timeouts_ms[0]);
        match primary.read(scratch, timeout, abort) {
            ReadOutcome::Samples(count) => {
                let gain = state.gains[0].priming_linear();
                scratch[..count].iter_mut().for_each(|s| *s *= gain);
                self.output.set_frame_len(frame_len);
                self.write(&scratch[..count], abort)
            }
            ReadOutcome::TimedOut | ReadOutcome::Drained => Step::Continue,
            ReadOutcome::Aborted => Step::Aborted,
        }
    }

    /// Fan in every live input; starved inputs contribute silence.
    ///
    /// An input that timed out is polled without waiting until it delivers a
    /// full chunk again, so one stalled source costs at most one timeout
    /// instead of one per cycle. When every live input is starved the
    /// regular timeouts apply.
    fn mix_inputs(
        &self,
        state: &MixerState,
        ramp: &mut GainRamp,
        starved: &mut [bool],
        scratch: &mut Vec<f32>,
        mixed: &mut Vec<f32>,
        abort: &AtomicBool,
    ) -> Step {
        let channels = state
            .format
            .map(|format| format.channels as usize)
            .unwrap_or_else(|| self.inputs[0].frame_len())
            .max(1);
        let chunk = self.mix_frames * channels;
        scratch.resize(chunk, 0.0);
        mixed.clear();
        mixed.resize(chunk, 0.0);

        let all_starved = self
            .inputs
            .iter()
            .zip(starved.iter())
            .all(|(input, starved)| *starved || input.is_drained());

        let mut produced = 0usize;
        for (slot, input) in self.inputs.iter().enumerate() {
            if input.is_drained() {
                continue;
            }
            let timeout = if starved[slot] && !all_starved {
                ReadTimeout::Bounded(Duration::ZERO)
            } else {
                ReadTimeout::from_ms(state.timeouts_ms[slot])
            };
            match input.read(scratch, timeout, abort) {
                ReadOutcome::Samples(count) => {
                    let gain = ramp.gain(slot);
                    for (out, sample) in mixed.iter_mut().zip(&scratch[..count]) {
                        *out += sample * gain;
                    }
                    produced = produced.max(count);
                    if starved[slot] && count == chunk {
                        debug!("mixer: {} recovered", SourceId(slot as u16));
                        starved[slot] = false;
                    }
                }
                ReadOutcome::TimedOut => {
                    if !starved[slot] {
                        debug!("mixer: {} starved, mixing silence", SourceId(slot as u16));
                        starved[slot] = true;
                    }
                }
                ReadOutcome::Drained => {}
                ReadOutcome::Aborted => return Step::Aborted,
            }
        }

        let produced = produced - produced % channels;
        if produced == 0 {
            return Step::Continue;
        }

        let block = &mut mixed[..produced];
        block.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0));
        if state.output_channels == OutputChannelMode::Mono {
            fold_to_mono(block, channels);
        }
        ramp.advance(produced / channels);
        self.output.set_frame_len(channels);
        self.write(&mixed[..produced], abort)
    }

    fn write(&self, samples: &[f32], abort: &AtomicBool) -> Step {
        if self.output.write(samples, abort) < samples.len() {
            Step::Aborted
        } else {
            Step::Continue
        }
    }
}

/// Replace every frame with its channel average on all channels.
pub fn fold_to_mono(samples: &mut [f32], channels: usize) {
    if channels < 2 {
        return;
    }
    for frame in samples.chunks_exact_mut(channels) {
        let average = frame.iter().sum::<f32>() / channels as f32;
        frame.fill(average);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::PcmBuffer;
    use crate::events::{listener_slot, ElementId};
    use crate::mix::state::SlotGain;
    use std::thread::JoinHandle;
    use std::time::Instant;

    fn gains(count: usize) -> Vec<SlotGain> {
        (0..count)
            .map(|slot| {
                if slot == 0 {
                    SlotGain::new(0.0, 0.0)
                } else {
                    SlotGain::new(f32::NEG_INFINITY, -20.0)
                }
            })
            .collect()
    }

    fn mixer(count: usize, output_channels: OutputChannelMode) -> (Downmixer, Vec<SharedPcmBuffer>) {
        let state = MixerState::new(gains(count), 0, output_channels, 0);
        let mut mixer = Downmixer::new(state, 4, PcmBuffer::new(256));
        let inputs: Vec<_> = (0..count).map(|_| PcmBuffer::new(256)).collect();
        for (index, input) in inputs.iter().enumerate() {
            mixer.bind_input(index, input.clone()).expect("bind");
        }
        (mixer, inputs)
    }

    fn spawn(mixer: &Downmixer, abort: &Arc<AtomicBool>) -> JoinHandle<()> {
        let task = mixer
            .task(Emitter::new(ElementId::Mixer, listener_slot()))
            .expect("task");
        let abort = abort.clone();
        thread::spawn(move || (task.body)(abort))
    }

    fn drain(output: &SharedPcmBuffer) -> Vec<f32> {
        let abort = AtomicBool::new(false);
        let mut collected = Vec::new();
        let mut out = [0.0_f32; 64];
        loop {
            match output.read(&mut out, ReadTimeout::Unbounded, &abort) {
                ReadOutcome::Samples(n) => collected.extend_from_slice(&out[..n]),
                _ => return collected,
            }
        }
    }

    #[test]
    fn binding_is_checked() {
        let (mut mixer, _) = mixer(2, OutputChannelMode::Source);
        assert!(mixer.bind_input(0, PcmBuffer::new(4)).is_err());
        assert!(mixer.bind_input(2, PcmBuffer::new(4)).is_err());
    }

    #[test]
    fn task_requires_every_input() {
        let state = MixerState::new(gains(2), 0, OutputChannelMode::Source, 0);
        let mut mixer = Downmixer::new(state, 4, PcmBuffer::new(16));
        mixer.bind_input(0, PcmBuffer::new(4)).expect("bind");
        assert!(mixer
            .task(Emitter::new(ElementId::Mixer, listener_slot()))
            .is_err());
    }

    #[test]
    fn activate_sets_all_timeouts_once() {
        let (mixer, _) = mixer(3, OutputChannelMode::Source);
        mixer.set_input_timeout(0, 50).expect("timeout");
        assert_eq!(mixer.state().timeouts_ms, vec![50, 0, 0]);

        mixer
            .activate(50, AudioFormat::new(48_000, 16, 1))
            .expect("activate");
        let state = mixer.state();
        assert_eq!(state.mode, WorkMode::Active);
        assert_eq!(state.timeouts_ms, vec![50, 50, 50]);
        assert!(mixer.activate(20, AudioFormat::new(8_000, 16, 1)).is_err());
        assert!(mixer.set_mode(WorkMode::Priming).is_err());
        assert_eq!(mixer.state().format, Some(AudioFormat::new(48_000, 16, 1)));
    }

    #[test]
    fn priming_forwards_only_the_primary() {
        let (mixer, inputs) = mixer(2, OutputChannelMode::Source);
        let abort = Arc::new(AtomicBool::new(false));
        let no_abort = AtomicBool::new(false);
        inputs[0].write(&[0.5; 8], &no_abort);
        inputs[1].write(&[0.9; 8], &no_abort);
        inputs[0].close();
        inputs[1].close();

        let handle = spawn(&mixer, &abort);
        let primary_only: Vec<f32> = {
            let mut out = [0.0_f32; 8];
            match mixer.output().read(&mut out, ReadTimeout::Unbounded, &no_abort) {
                ReadOutcome::Samples(n) => out[..n].to_vec(),
                other => panic!("unexpected {:?}", other),
            }
        };
        assert!(primary_only.iter().all(|s| (*s - 0.5).abs() < 1e-6));

        // Overlay audio stays queued until activation.
        thread::sleep(Duration::from_millis(30));
        assert_eq!(inputs[1].len(), 8);
        mixer
            .activate(20, AudioFormat::new(8_000, 16, 1))
            .expect("activate");
        let rest = drain(&mixer.output());
        handle.join().expect("mixer thread");
        assert_eq!(rest.len(), 8);
        assert!(rest.iter().all(|s| (*s - 0.09).abs() < 1e-4));
    }

    #[test]
    fn starved_input_does_not_block_output() {
        let (mixer, inputs) = mixer(2, OutputChannelMode::Source);
        mixer
            .activate(20, AudioFormat::new(8_000, 16, 1))
            .expect("activate");
        let abort = Arc::new(AtomicBool::new(false));
        let handle = spawn(&mixer, &abort);

        let no_abort = AtomicBool::new(false);
        inputs[0].write(&[0.25; 4], &no_abort);
        let mut out = [0.0_f32; 4];
        let outcome = mixer.output().read(
            &mut out,
            ReadTimeout::Bounded(Duration::from_millis(500)),
            &no_abort,
        );
        assert_eq!(outcome, ReadOutcome::Samples(4));
        assert_eq!(out, [0.25; 4]);

        abort.store(true, Ordering::SeqCst);
        handle.join().expect("mixer thread");
        assert!(mixer.output().is_closed());
    }

    #[test]
    fn stalled_input_costs_one_timeout_not_one_per_cycle() {
        let (mixer, inputs) = mixer(2, OutputChannelMode::Source);
        mixer
            .activate(50, AudioFormat::new(8_000, 16, 1))
            .expect("activate");
        let no_abort = AtomicBool::new(false);
        // 50 cycles of primary audio; the overlay never delivers.
        inputs[0].write(&[0.25; 200], &no_abort);
        inputs[0].close();

        let abort = Arc::new(AtomicBool::new(false));
        let started = Instant::now();
        let handle = spawn(&mixer, &abort);
        let output = mixer.output();
        while output.len() < 200 && started.elapsed() < Duration::from_secs(3) {
            thread::sleep(Duration::from_millis(5));
        }
        let elapsed = started.elapsed();

        abort.store(true, Ordering::SeqCst);
        handle.join().expect("mixer thread");
        assert_eq!(output.len(), 200);
        assert!(
            elapsed < Duration::from_millis(500),
            "mixing 50 cycles took {:?}",
            elapsed
        );
    }

    #[test]
    fn mono_mode_folds_frames() {
        let state = MixerState::new(gains(1), 0, OutputChannelMode::Mono, 0);
        let mut mixer = Downmixer::new(state, 2, PcmBuffer::new(64));
        let input = PcmBuffer::new(64);
        input.set_frame_len(2);
        mixer.bind_input(0, input.clone()).expect("bind");
        mixer
            .activate(20, AudioFormat::new(8_000, 16, 2))
            .expect("activate");

        let no_abort = AtomicBool::new(false);
        input.write(&[1.0, 0.0, 0.2, 0.4], &no_abort);
        input.close();
        let abort = Arc::new(AtomicBool::new(false));
        let handle = spawn(&mixer, &abort);
        let mixed = drain(&mixer.output());
        handle.join().expect("mixer thread");

        let expected = [0.5, 0.5, 0.3, 0.3];
        assert_eq!(mixed.len(), expected.len());
        for (got, want) in mixed.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn drained_inputs_close_the_output() {
        let (mixer, inputs) = mixer(2, OutputChannelMode::Source);
        inputs.iter().for_each(|input| input.close());
        let abort = Arc::new(AtomicBool::new(false));
        spawn(&mixer, &abort).join().expect("mixer thread");
        assert!(mixer.output().is_drained());
    }
}
