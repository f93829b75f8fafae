//! Shared defaults for session configuration.

/// Per-input read timeout once the mixer is active (ms).
pub const DEFAULT_ACTIVE_TIMEOUT_MS: u64 = 50;

/// Read timeout for the primary input while priming; `0` waits without
/// bound.
pub const DEFAULT_PRIMING_TIMEOUT_MS: u64 = 0;

/// Gain of the primary (first) source while mixing (dB).
pub const DEFAULT_PRIMARY_GAIN_DB: f32 = 0.0;

/// Gain of every overlay source while mixing (dB).
pub const DEFAULT_OVERLAY_GAIN_DB: f32 = -10.0;

/// Capacity of each per-source ring buffer, in samples.
pub const DEFAULT_SOURCE_BUFFER_SAMPLES: usize = 24_000;

/// Capacity of the mixed-output ring buffer, in samples.
pub const DEFAULT_MIXED_BUFFER_SAMPLES: usize = 9_600;

/// Frames pulled from each input per mix cycle.
pub const DEFAULT_MIX_FRAMES: usize = 480;

/// Attempts made while waiting for storage to become readable.
pub const DEFAULT_MOUNT_RETRIES: u32 = 10;

/// Delay between storage mount attempts (ms).
pub const DEFAULT_MOUNT_RETRY_MS: u64 = 500;
