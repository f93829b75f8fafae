//! Format probing without running a session.

use std::path::PathBuf;
use std::time::Duration;

use crate::audio::format::AudioFormat;
use crate::config::SessionConfig;
use crate::error::PlaybackError;
use crate::source::DecoderFactory;
use crate::storage::PeripheralSet;

/// Probe result for one configured source.
#[derive(Debug)]
pub struct SourceProbe {
    pub path: PathBuf,
    pub format: Result<AudioFormat, PlaybackError>,
}

/// Open every configured source and read its stream format.
///
/// # Errors
///
/// Fails only if storage cannot be mounted; per-source failures are
/// reported in each [`SourceProbe`].
pub fn probe_sources(
    config: &SessionConfig,
    factory: &dyn DecoderFactory,
) -> Result<Vec<SourceProbe>, PlaybackError> {
    let mut peripherals = PeripheralSet::new(&config.storage_root);
    let storage = peripherals.storage();
    storage.mount(
        config.mount_retries,
        Duration::from_millis(config.mount_retry_ms),
    )?;

    let probes = config
        .sources
        .iter()
        .map(|source| {
            let format = storage
                .open(&source.path)
                .and_then(|(file, path)| factory.open(file, &path))
                .and_then(|mut decoder| decoder.probe());
            SourceProbe {
                path: storage.resolve(&source.path),
                format,
            }
        })
        .collect();

    peripherals.stop_all();
    Ok(probes)
}
