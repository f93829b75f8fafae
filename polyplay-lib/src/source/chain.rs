//! Source chain: storage reader, decoder and buffer writer on one pipeline.

use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::buffer::{PcmBuffer, SharedPcmBuffer};
use crate::error::PlaybackError;
use crate::events::{ElementId, ElementStatus, Emitter, SourceId};
use crate::pipeline::{ChainControl, Pipeline, PipelineTask};
use crate::storage::SharedStorage;

use super::decoder::DecoderFactory;

/// How a decode task ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeEnd {
    Finished,
    Aborted,
}

struct DecodeTask {
    media: PathBuf,
    storage: SharedStorage,
    factory: Arc<dyn DecoderFactory>,
    buffer: SharedPcmBuffer,
    reader: Emitter,
    decoder: Emitter,
    writer: Emitter,
}

impl DecodeTask {
    fn run(self, abort: Arc<AtomicBool>) {
        match self.decode(&abort) {
            Ok(DecodeEnd::Finished) => {
                info!("{}: end of stream", self.media.display());
                self.decoder.report_status(ElementStatus::Finished);
            }
            Ok(DecodeEnd::Aborted) => debug!("{}: decode aborted", self.media.display()),
            Err(err) => error!("{}: {}", self.media.display(), err),
        }
        // The mixer must see end of stream whatever happened above.
        self.buffer.close();
        self.writer.report_status(ElementStatus::Stopped);
    }

    fn decode(&self, abort: &AtomicBool) -> Result<DecodeEnd, PlaybackError> {
        let (file, path) = self.storage.open(&self.media).map_err(|err| {
            self.reader.report_status(ElementStatus::Error);
            err
        })?;
        self.reader.report_status(ElementStatus::Running);

        let opened = self.factory.open(file, &path).and_then(|mut decoder| {
            let format = decoder.probe()?;
            Ok((decoder, format))
        });
        let (mut decoder, format) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                self.decoder.report_status(ElementStatus::Error);
                return Err(err);
            }
        };
        debug!("{}: {}", path.display(), format);
        self.buffer.set_frame_len(format.channels as usize);
        self.decoder.report_format(format);
        self.decoder.report_status(ElementStatus::Running);

        loop {
            if abort.load(Ordering::Relaxed) {
                return Ok(DecodeEnd::Aborted);
            }
            let samples = match decoder.decode() {
                Ok(Some(samples)) => samples,
                Ok(None) => return Ok(DecodeEnd::Finished),
                Err(err) => {
                    self.decoder.report_status(ElementStatus::Error);
                    return Err(err);
                }
            };
            let written = self.buffer.write(&samples, abort);
            if written < samples.len() {
                return Ok(DecodeEnd::Aborted);
            }
        }
    }
}

/// One decode chain feeding a fixed mixer input slot.
pub struct SourceChain {
    id: SourceId,
    media: Option<PathBuf>,
    buffer: SharedPcmBuffer,
    pipeline: Pipeline,
    storage: SharedStorage,
    factory: Arc<dyn DecoderFactory>,
}

impl SourceChain {
    /// Build the chain and register its reader, decoder and writer.
    ///
    /// # Arguments
    ///
    /// * `id` - Stable identity; also the mixer input slot.
    /// * `storage` - Storage the reader opens media from.
    /// * `factory` - Decoder constructor.
    /// * `buffer_samples` - Capacity of the chain's output buffer.
    pub fn new(
        id: SourceId,
        storage: SharedStorage,
        factory: Arc<dyn DecoderFactory>,
        buffer_samples: usize,
    ) -> Result<Self, PlaybackError> {
        let mut pipeline = Pipeline::new(id.to_string());
        for element in Self::element_ids(id) {
            pipeline.register(element)?;
        }
        Ok(Self {
            id,
            media: None,
            buffer: PcmBuffer::new(buffer_samples),
            pipeline,
            storage,
            factory,
        })
    }

    /// Elements of chain `id` in link order.
    pub fn element_ids(id: SourceId) -> [ElementId; 3] {
        [
            ElementId::Reader(id),
            ElementId::Decoder(id),
            ElementId::Writer(id),
        ]
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn media(&self) -> Option<&Path> {
        self.media.as_deref()
    }

    /// Buffer the downmixer reads this chain's PCM from.
    pub fn buffer(&self) -> SharedPcmBuffer {
        self.buffer.clone()
    }

    /// Bind a media reference to the reader.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::ResourceUnavailable`] if storage is not mounted.
    pub fn start(&mut self, media: &Path) -> Result<(), PlaybackError> {
        if !self.storage.is_mounted() {
            return Err(PlaybackError::ResourceUnavailable(format!(
                "{}: storage is not mounted",
                self.id
            )));
        }
        self.media = Some(media.to_path_buf());
        Ok(())
    }

    /// Spawn the decode task.
    pub fn run(&mut self) -> Result<(), PlaybackError> {
        let Some(media) = self.media.clone() else {
            return Err(PlaybackError::InvalidInput(format!(
                "{}: no media bound",
                self.id
            )));
        };
        let task = DecodeTask {
            media,
            storage: self.storage.clone(),
            factory: self.factory.clone(),
            buffer: self.buffer.clone(),
            reader: self.pipeline.emitter(ElementId::Reader(self.id))?,
            decoder: self.pipeline.emitter(ElementId::Decoder(self.id))?,
            writer: self.pipeline.emitter(ElementId::Writer(self.id))?,
        };
        self.pipeline
            .run(vec![PipelineTask::new("decode", move |abort| task.run(abort))])
    }
}

impl ChainControl for SourceChain {
    fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{ReadOutcome, ReadTimeout};
    use crate::audio::format::AudioFormat;
    use crate::events::{Command, EventBus};
    use crate::source::decoder::SourceDecoder;
    use crate::storage::PeripheralSet;
    use std::fs::File;
    use std::time::Duration;

    struct Ramp {
        remaining: usize,
    }

    impl SourceDecoder for Ramp {
        fn probe(&mut self) -> Result<AudioFormat, PlaybackError> {
            Ok(AudioFormat::new(8_000, 16, 2))
        }

        fn decode(&mut self) -> Result<Option<Vec<f32>>, PlaybackError> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(vec![0.25; 4]))
        }
    }

    struct RampFactory;

    impl DecoderFactory for RampFactory {
        fn open(&self, _file: File, _path: &Path) -> Result<Box<dyn SourceDecoder>, PlaybackError> {
            Ok(Box::new(Ramp { remaining: 3 }))
        }
    }

    fn mounted_storage(dir: &tempfile::TempDir) -> PeripheralSet {
        std::fs::write(dir.path().join("a.mp3"), b"x").expect("fixture");
        let peripherals = PeripheralSet::new(dir.path());
        peripherals
            .storage()
            .mount(0, Duration::ZERO)
            .expect("mount");
        peripherals
    }

    #[test]
    fn start_fails_when_storage_not_mounted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let peripherals = PeripheralSet::new(dir.path());
        let mut chain =
            SourceChain::new(SourceId(0), peripherals.storage(), Arc::new(RampFactory), 64)
                .expect("chain");
        assert!(matches!(
            chain.start(Path::new("a.mp3")),
            Err(PlaybackError::ResourceUnavailable(_))
        ));
    }

    #[test]
    fn decodes_reports_format_and_closes_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let peripherals = mounted_storage(&dir);
        let bus = EventBus::new();
        let mut chain =
            SourceChain::new(SourceId(1), peripherals.storage(), Arc::new(RampFactory), 64)
                .expect("chain");
        chain.set_listener(bus.publisher());
        chain.start(Path::new("a.mp3")).expect("start");
        chain.run().expect("run");

        let buffer = chain.buffer();
        let abort = AtomicBool::new(false);
        let mut out = [0.0_f32; 64];
        let mut total = 0;
        loop {
            match buffer.read(&mut out, ReadTimeout::Unbounded, &abort) {
                ReadOutcome::Samples(n) => total += n,
                ReadOutcome::Drained => break,
                other => panic!("unexpected read outcome {:?}", other),
            }
        }
        assert_eq!(total, 12);
        assert_eq!(buffer.frame_len(), 2);

        chain.stop();
        chain.wait_for_stop();
        let events: Vec<_> = std::iter::from_fn(|| bus.listen(Some(Duration::ZERO)).ok()).collect();
        let format_events = events
            .iter()
            .filter(|e| matches!(e.command, Command::FormatReported(_)))
            .count();
        assert_eq!(format_events, 1);
        assert_eq!(events[1].source, ElementId::Decoder(SourceId(1)));
        let last = events.last().expect("events");
        assert_eq!(last.source, ElementId::Writer(SourceId(1)));
        assert_eq!(last.command, Command::StatusChanged(ElementStatus::Stopped));
    }

    #[test]
    fn missing_media_closes_buffer_with_error_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let peripherals = mounted_storage(&dir);
        let bus = EventBus::new();
        let mut chain =
            SourceChain::new(SourceId(0), peripherals.storage(), Arc::new(RampFactory), 64)
                .expect("chain");
        chain.set_listener(bus.publisher());
        chain.start(Path::new("missing.mp3")).expect("start");
        chain.run().expect("run");
        chain.wait_for_stop();

        assert!(chain.buffer().is_drained());
        let first = bus.listen(Some(Duration::from_millis(100))).expect("event");
        assert_eq!(first.source, ElementId::Reader(SourceId(0)));
        assert_eq!(first.command, Command::StatusChanged(ElementStatus::Error));
    }

    #[test]
    fn elements_unregister_only_after_stop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let peripherals = mounted_storage(&dir);
        let mut chain =
            SourceChain::new(SourceId(0), peripherals.storage(), Arc::new(RampFactory), 4)
                .expect("chain");
        chain.start(Path::new("a.mp3")).expect("start");
        chain.run().expect("run");
        assert!(chain.unregister_elements().is_err());
        chain.stop();
        chain.wait_for_stop();
        chain.terminate().expect("terminate");
        chain.unregister_elements().expect("unregister");
        assert!(chain.elements().is_empty());
    }
}
