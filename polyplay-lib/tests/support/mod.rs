#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use polyplay_lib::output::{AudioSink, SinkOpener};
use polyplay_lib::source::{DecoderFactory, SourceDecoder};
use polyplay_lib::{AudioFormat, PlaybackError, SessionConfig};

/// Behaviour of one scripted source.
#[derive(Debug, Clone)]
pub struct Script {
    pub format: AudioFormat,
    pub probe_delay: Duration,
    pub block_delay: Duration,
    pub blocks: usize,
    pub block_frames: usize,
    pub value: f32,
    pub fail_probe: bool,
}

impl Script {
    pub fn new(format: AudioFormat, blocks: usize) -> Self {
        Self {
            format,
            probe_delay: Duration::ZERO,
            block_delay: Duration::ZERO,
            blocks,
            block_frames: 480,
            value: 0.1,
            fail_probe: false,
        }
    }

    pub fn probe_after(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn block_every(mut self, delay: Duration) -> Self {
        self.block_delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_probe = true;
        self
    }
}

struct ScriptedDecoder {
    script: Script,
    produced: usize,
}

impl SourceDecoder for ScriptedDecoder {
    fn probe(&mut self) -> Result<AudioFormat, PlaybackError> {
        thread::sleep(self.script.probe_delay);
        if self.script.fail_probe {
            return Err(PlaybackError::Decode("scripted probe failure".to_string()));
        }
        Ok(self.script.format)
    }

    fn decode(&mut self) -> Result<Option<Vec<f32>>, PlaybackError> {
        if self.produced == self.script.blocks {
            return Ok(None);
        }
        thread::sleep(self.script.block_delay);
        self.produced += 1;
        let len = self.script.block_frames * self.script.format.channels as usize;
        Ok(Some(vec![self.script.value; len]))
    }
}

/// Factory handing out scripts by media file name.
pub struct ScriptedFactory {
    scripts: HashMap<String, Script>,
}

impl ScriptedFactory {
    pub fn new(scripts: Vec<(&str, Script)>) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts
                .into_iter()
                .map(|(name, script)| (name.to_string(), script))
                .collect(),
        })
    }
}

impl DecoderFactory for ScriptedFactory {
    fn open(&self, _file: File, path: &Path) -> Result<Box<dyn SourceDecoder>, PlaybackError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let script = self
            .scripts
            .get(name)
            .cloned()
            .ok_or_else(|| PlaybackError::NotFound(path.to_path_buf()))?;
        Ok(Box::new(ScriptedDecoder {
            script,
            produced: 0,
        }))
    }
}

/// Everything a [`CaptureSink`] observed.
pub struct Capture {
    pub opened: AtomicUsize,
    pub clock: Mutex<Option<AudioFormat>>,
    pub samples: Mutex<Vec<f32>>,
    pub first_write: Mutex<Option<Instant>>,
}

impl Capture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            opened: AtomicUsize::new(0),
            clock: Mutex::new(None),
            samples: Mutex::new(Vec::new()),
            first_write: Mutex::new(None),
        })
    }

    pub fn opener(self: &Arc<Self>) -> SinkOpener {
        let capture = self.clone();
        Box::new(move || {
            capture.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CaptureSink(capture)) as Box<dyn AudioSink>)
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().unwrap().len()
    }
}

struct CaptureSink(Arc<Capture>);

impl AudioSink for CaptureSink {
    fn set_clock(&mut self, format: AudioFormat) -> Result<(), PlaybackError> {
        *self.0.clock.lock().unwrap() = Some(format);
        Ok(())
    }

    fn write(&mut self, samples: &[f32], _abort: &AtomicBool) -> Result<(), PlaybackError> {
        self.0.first_write.lock().unwrap().get_or_insert_with(Instant::now);
        self.0.samples.lock().unwrap().extend_from_slice(samples);
        Ok(())
    }

    fn drain(&mut self) {}
}

/// Opener for a machine with no usable output device.
pub fn missing_device() -> SinkOpener {
    Box::new(|| Err(PlaybackError::Device("no default output device".to_string())))
}

/// Storage root with an empty placeholder file per media name.
pub fn media_dir(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for name in names {
        std::fs::write(dir.path().join(name), b"").expect("placeholder media");
    }
    dir
}

/// Session config over `root` that never waits for storage.
pub fn config(root: &Path, names: &[&str]) -> SessionConfig {
    let mut config = SessionConfig::with_sources(names.iter().map(PathBuf::from));
    config.storage_root = root.to_path_buf();
    config.mount_retries = 0;
    config.mount_retry_ms = 0;
    config
}

/// Write a 16-bit mono WAV of constant `value`.
pub fn write_wav(path: &Path, sample_rate: u32, frames: usize, value: i16) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("wav writer");
    for _ in 0..frames {
        writer.write_sample(value).expect("wav sample");
    }
    writer.finalize().expect("finalize wav");
}
