//! Directory-backed storage peripheral that source chains read media from.

use log::{info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::PlaybackError;
use crate::events::{listener_slot, ElementId, ElementStatus, Emitter, EventPublisher, ListenerSlot};

/// Shared handle to the storage peripheral.
pub type SharedStorage = Arc<StoragePeripheral>;

/// Media root that must be mounted before any source chain may start.
#[derive(Debug)]
pub struct StoragePeripheral {
    root: PathBuf,
    mounted: AtomicBool,
    emitter: Emitter,
}

impl StoragePeripheral {
    fn new(root: PathBuf, listener: ListenerSlot) -> Self {
        Self {
            root,
            mounted: AtomicBool::new(false),
            emitter: Emitter::new(ElementId::Storage, listener),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Wait for the root directory to become readable.
    ///
    /// # Arguments
    ///
    /// * `retries` - Number of additional attempts after the first.
    /// * `retry_delay` - Pause between attempts.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::ResourceUnavailable`] if the root never appears.
    pub fn mount(&self, retries: u32, retry_delay: Duration) -> Result<(), PlaybackError> {
        for attempt in 0..=retries {
            if self.root.is_dir() {
                self.mounted.store(true, Ordering::Release);
                info!("storage mounted at {}", self.root.display());
                self.emitter.report_status(ElementStatus::Running);
                return Ok(());
            }
            if attempt < retries {
                warn!(
                    "storage root {} not ready (attempt {}/{})",
                    self.root.display(),
                    attempt + 1,
                    retries + 1
                );
                thread::sleep(retry_delay);
            }
        }
        Err(PlaybackError::ResourceUnavailable(format!(
            "storage root {} is not mounted",
            self.root.display()
        )))
    }

    fn unmount(&self) {
        if self.mounted.swap(false, Ordering::AcqRel) {
            self.emitter.report_status(ElementStatus::Stopped);
        }
    }

    /// Map a media reference to a path under the root. Absolute references
    /// are used as-is.
    pub fn resolve(&self, media: &Path) -> PathBuf {
        if media.is_absolute() {
            media.to_path_buf()
        } else {
            self.root.join(media)
        }
    }

    /// Open a media reference for reading.
    ///
    /// # Returns
    ///
    /// The open file and its resolved path.
    pub fn open(&self, media: &Path) -> Result<(File, PathBuf), PlaybackError> {
        if !self.is_mounted() {
            return Err(PlaybackError::ResourceUnavailable(
                "storage is not mounted".to_string(),
            ));
        }
        let path = self.resolve(media);
        match File::open(&path) {
            Ok(file) => Ok((file, path)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(PlaybackError::NotFound(path))
            }
            Err(err) => Err(PlaybackError::Io(err)),
        }
    }
}

/// Peripherals living outside every pipeline, with their own bus listener.
pub struct PeripheralSet {
    storage: SharedStorage,
    listener: ListenerSlot,
    stopped: bool,
}

impl PeripheralSet {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        let listener = listener_slot();
        Self {
            storage: Arc::new(StoragePeripheral::new(storage_root.into(), listener.clone())),
            listener,
            stopped: false,
        }
    }

    pub fn storage(&self) -> SharedStorage {
        self.storage.clone()
    }

    pub fn set_listener(&mut self, publisher: EventPublisher) {
        *self.listener.lock().unwrap() = Some(publisher);
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }

    /// Stop every peripheral. Idempotent.
    pub fn stop_all(&mut self) {
        self.storage.unmount();
        self.stopped = true;
    }

    /// Detach from the bus; only valid after [`PeripheralSet::stop_all`].
    pub fn remove_listener(&mut self) -> Result<(), PlaybackError> {
        if !self.stopped {
            return Err(PlaybackError::PipelineState(
                "peripherals still running".to_string(),
            ));
        }
        self.listener.lock().unwrap().take();
        Ok(())
    }
}
