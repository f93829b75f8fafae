//! Output chain: downmixer and sink on one pipeline, plus the device clock.

use log::{debug, error, info};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::audio::buffer::{PcmBuffer, ReadOutcome, ReadTimeout, SharedPcmBuffer};
use crate::audio::format::AudioFormat;
use crate::error::PlaybackError;
use crate::events::{ElementId, ElementStatus, Emitter};
use crate::mix::{Downmixer, MixerState};
use crate::pipeline::{ChainControl, Pipeline, PipelineTask};

use super::sink::{AudioSink, SinkOpener};

const CLOCK_WAIT: Duration = Duration::from_millis(20);
const SINK_READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Frames handed to the device per write.
const SINK_CHUNK_FRAMES: usize = 1024;

/// Write-once device clock shared between the orchestrator and the sink task.
#[derive(Debug, Default)]
pub struct ClockCell {
    format: Mutex<Option<AudioFormat>>,
    ready: Condvar,
}

impl ClockCell {
    pub fn get(&self) -> Option<AudioFormat> {
        *self.format.lock().unwrap()
    }

    /// Set the clock once.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::ClockAlreadyConfigured`] carrying the existing clock,
    /// which is left unchanged.
    pub fn configure(&self, format: AudioFormat) -> Result<(), PlaybackError> {
        let mut current = self.format.lock().unwrap();
        if let Some(existing) = *current {
            return Err(PlaybackError::ClockAlreadyConfigured(existing));
        }
        *current = Some(format);
        drop(current);
        self.ready.notify_all();
        Ok(())
    }

    fn wait(&self, timeout: Duration) -> Option<AudioFormat> {
        let current = self.format.lock().unwrap();
        if current.is_some() {
            return *current;
        }
        let (current, _) = self.ready.wait_timeout(current, timeout).unwrap();
        *current
    }
}

/// Failure that ended the sink task, kept for the session owner.
type SinkFailure = Arc<Mutex<Option<PlaybackError>>>;

struct SinkTask {
    mixed: SharedPcmBuffer,
    clock: Arc<ClockCell>,
    failure: SinkFailure,
    emitter: Emitter,
}

impl SinkTask {
    fn run(self, opener: SinkOpener, abort: Arc<AtomicBool>) {
        let status = match self.play(opener, &abort) {
            Ok(status) => status,
            Err(err) => {
                error!("sink: {}", err);
                *self.failure.lock().unwrap() = Some(err);
                self.emitter.report_status(ElementStatus::Error);
                ElementStatus::Stopped
            }
        };
        // Unblocks the mixer if the device went away first.
        self.mixed.close();
        self.emitter.report_status(status);
    }

    fn play(&self, opener: SinkOpener, abort: &AtomicBool) -> Result<ElementStatus, PlaybackError> {
        let format = loop {
            if abort.load(std::sync::atomic::Ordering::Relaxed) {
                return Ok(ElementStatus::Stopped);
            }
            if let Some(format) = self.clock.wait(CLOCK_WAIT) {
                break format;
            }
            if self.mixed.is_drained() {
                info!("sink: mixed stream ended before the clock was configured");
                return Ok(ElementStatus::Finished);
            }
        };

        let mut sink: Box<dyn AudioSink> = opener()?;
        sink.set_clock(format)?;
        self.emitter.report_status(ElementStatus::Running);

        let mut out = vec![0.0_f32; SINK_CHUNK_FRAMES * format.channels.max(1) as usize];
        loop {
            match self
                .mixed
                .read(&mut out, ReadTimeout::Bounded(SINK_READ_TIMEOUT), abort)
            {
                ReadOutcome::Samples(count) => sink.write(&out[..count], abort)?,
                ReadOutcome::TimedOut => {}
                ReadOutcome::Drained => {
                    debug!("sink: draining device");
                    sink.drain();
                    return Ok(ElementStatus::Finished);
                }
                ReadOutcome::Aborted => return Ok(ElementStatus::Stopped),
            }
        }
    }
}

/// Mixed-output chain feeding the single audio device.
pub struct OutputChain {
    mixer: Downmixer,
    clock: Arc<ClockCell>,
    failure: SinkFailure,
    pipeline: Pipeline,
    opener: Option<SinkOpener>,
}

impl OutputChain {
    /// Build the chain and register its mixer and sink.
    ///
    /// # Arguments
    ///
    /// * `mixer_state` - Initial downmixer state.
    /// * `mix_frames` - Frames per mix cycle.
    /// * `mixed_buffer_samples` - Capacity of the mixer-to-sink buffer.
    /// * `opener` - Opens the device once the clock is known.
    pub fn new(
        mixer_state: MixerState,
        mix_frames: usize,
        mixed_buffer_samples: usize,
        opener: SinkOpener,
    ) -> Result<Self, PlaybackError> {
        let mut pipeline = Pipeline::new("output");
        for element in Self::element_ids() {
            pipeline.register(element)?;
        }
        Ok(Self {
            mixer: Downmixer::new(mixer_state, mix_frames, PcmBuffer::new(mixed_buffer_samples)),
            clock: Arc::new(ClockCell::default()),
            failure: Arc::new(Mutex::new(None)),
            pipeline,
            opener: Some(opener),
        })
    }

    pub fn element_ids() -> [ElementId; 2] {
        [ElementId::Mixer, ElementId::Sink]
    }

    pub fn mixer(&self) -> &Downmixer {
        &self.mixer
    }

    pub fn bind_input(&mut self, index: usize, buffer: SharedPcmBuffer) -> Result<(), PlaybackError> {
        self.mixer.bind_input(index, buffer)
    }

    /// Negotiated device clock, once configured.
    pub fn clock(&self) -> Option<AudioFormat> {
        self.clock.get()
    }

    /// Take the error that ended the sink, if it failed.
    pub fn take_sink_error(&self) -> Option<PlaybackError> {
        self.failure.lock().unwrap().take()
    }

    /// Configure the device clock; only the first call takes effect.
    pub fn configure_clock(&self, format: AudioFormat) -> Result<(), PlaybackError> {
        self.clock.configure(format)
    }

    /// Spawn the mix and sink tasks.
    pub fn run(&mut self) -> Result<(), PlaybackError> {
        let Some(opener) = self.opener.take() else {
            return Err(PlaybackError::PipelineState(
                "output chain already ran".to_string(),
            ));
        };
        let mix = self.mixer.task(self.pipeline.emitter(ElementId::Mixer)?)?;
        let sink = SinkTask {
            mixed: self.mixer.output(),
            clock: self.clock.clone(),
            failure: self.failure.clone(),
            emitter: self.pipeline.emitter(ElementId::Sink)?,
        };
        self.pipeline.run(vec![
            mix,
            PipelineTask::new("sink", move |abort| sink.run(opener, abort)),
        ])
    }
}

impl ChainControl for OutputChain {
    fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }
}
