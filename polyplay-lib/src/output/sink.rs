//! Audio sink seam and the rodio-backed default device.

use log::{error, info, warn};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::format::AudioFormat;
use crate::error::PlaybackError;

const OUTPUT_STREAM_OPEN_RETRIES: usize = 20;
const OUTPUT_STREAM_OPEN_RETRY_MS: u64 = 100;

/// Chunks queued in the rodio sink before `write` applies backpressure.
const MAX_QUEUED_CHUNKS: usize = 4;

/// Longest wait for the device to consume a queued chunk.
const DEVICE_STALL_TIMEOUT: Duration = Duration::from_secs(5);
const QUEUE_POLL: Duration = Duration::from_millis(5);

/// Output device driver.
pub trait AudioSink {
    /// Configure the device clock. Called once, before any write.
    fn set_clock(&mut self, format: AudioFormat) -> Result<(), PlaybackError>;

    /// Queue interleaved samples laid out per the configured clock.
    ///
    /// Blocking for device room gives up when `abort` is raised; the
    /// samples are then dropped.
    fn write(&mut self, samples: &[f32], abort: &AtomicBool) -> Result<(), PlaybackError>;

    /// Block until everything queued has been played.
    fn drain(&mut self);
}

/// Opens the device on the thread that will drive it.
pub type SinkOpener = Box<dyn FnOnce() -> Result<Box<dyn AudioSink>, PlaybackError> + Send>;

/// Opener for the default rodio output device.
pub fn rodio_opener() -> SinkOpener {
    Box::new(|| Ok(Box::new(RodioSink::open()?) as Box<dyn AudioSink>))
}

/// Default system output through rodio.
pub struct RodioSink {
    _stream: OutputStream,
    sink: Sink,
    format: Option<AudioFormat>,
    /// Samples short of a whole frame, held for the next write.
    carry: Vec<f32>,
}

impl RodioSink {
    /// Open the default output stream, retrying while the device is busy.
    pub fn open() -> Result<Self, PlaybackError> {
        let stream = open_output_stream_with_retry()?;
        let sink = Sink::connect_new(stream.mixer());
        Ok(Self {
            _stream: stream,
            sink,
            format: None,
            carry: Vec::new(),
        })
    }
}

impl AudioSink for RodioSink {
    fn set_clock(&mut self, format: AudioFormat) -> Result<(), PlaybackError> {
        if let Some(existing) = self.format {
            return Err(PlaybackError::ClockAlreadyConfigured(existing));
        }
        if format.channels == 0 || format.sample_rate == 0 {
            return Err(PlaybackError::Device(format!("unusable clock {}", format)));
        }
        info!("output clock: {}", format);
        self.format = Some(format);
        Ok(())
    }

    fn write(&mut self, samples: &[f32], abort: &AtomicBool) -> Result<(), PlaybackError> {
        let Some(format) = self.format else {
            return Err(PlaybackError::Device("clock not configured".to_string()));
        };

        self.carry.extend_from_slice(samples);
        let channels = format.channels as usize;
        let whole = self.carry.len() - self.carry.len() % channels;
        if whole == 0 {
            return Ok(());
        }
        let chunk: Vec<f32> = self.carry.drain(..whole).collect();

        let sink = &self.sink;
        if !wait_for_room(|| sink.len(), MAX_QUEUED_CHUNKS, DEVICE_STALL_TIMEOUT, abort)? {
            return Ok(());
        }
        self.sink
            .append(SamplesBuffer::new(format.channels, format.sample_rate, chunk));
        Ok(())
    }

    fn drain(&mut self) {
        self.sink.sleep_until_end();
    }
}

/// Wait until fewer than `limit` chunks are queued.
///
/// Returns `Ok(false)` when aborted, and a device error if the queue does not
/// move for `stall`.
fn wait_for_room<F>(
    queued: F,
    limit: usize,
    stall: Duration,
    abort: &AtomicBool,
) -> Result<bool, PlaybackError>
where
    F: Fn() -> usize,
{
    let mut last = queued();
    let mut progress_at = Instant::now();
    while last >= limit {
        if abort.load(Ordering::Relaxed) {
            return Ok(false);
        }
        if progress_at.elapsed() >= stall {
            return Err(PlaybackError::Device(format!(
                "output stalled with {} chunks queued for {:?}",
                last, stall
            )));
        }
        thread::sleep(QUEUE_POLL);
        let now = queued();
        if now < last {
            progress_at = Instant::now();
        }
        last = now;
    }
    Ok(true)
}

fn open_output_stream_with_retry() -> Result<OutputStream, PlaybackError> {
    for attempt in 1..=OUTPUT_STREAM_OPEN_RETRIES {
        match OutputStreamBuilder::open_default_stream() {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if attempt == OUTPUT_STREAM_OPEN_RETRIES {
                    error!(
                        "failed to open default output stream after {} attempts: {}",
                        OUTPUT_STREAM_OPEN_RETRIES, err
                    );
                    return Err(PlaybackError::Device(err.to_string()));
                }
                warn!(
                    "open_default_stream attempt {}/{} failed: {}",
                    attempt, OUTPUT_STREAM_OPEN_RETRIES, err
                );
                thread::sleep(Duration::from_millis(OUTPUT_STREAM_OPEN_RETRY_MS));
            }
        }
    }
    Err(PlaybackError::Device("no output stream".to_string()))
}
