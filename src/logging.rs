use log::{LevelFilter, Log, Metadata, Record};
use std::sync::OnceLock;

struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger. `RUST_LOG` picks the level unless `debug`
/// forces it.
pub fn init(debug: bool) -> LevelFilter {
    let level = if debug {
        LevelFilter::Debug
    } else {
        level_from_env(std::env::var("RUST_LOG").ok().as_deref())
    };

    let logger_ref = LOGGER.get_or_init(|| StderrLogger { level });
    if log::set_logger(logger_ref).is_ok() {
        log::set_max_level(level);
    }
    level
}

fn level_from_env(value: Option<&str>) -> LevelFilter {
    match value.map(|level| level.to_lowercase()) {
        Some(level) => match level.as_str() {
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Info,
        },
        None => LevelFilter::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(level_from_env(None), LevelFilter::Info);
        assert_eq!(level_from_env(Some("WARN")), LevelFilter::Warn);
        assert_eq!(level_from_env(Some("verbose")), LevelFilter::Info);
    }
}
