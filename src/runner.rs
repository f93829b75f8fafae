use clap::ArgMatches;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use polyplay_lib::audio::level::parse_db_str;
use polyplay_lib::mix::OutputChannelMode;
use polyplay_lib::output::rodio_opener;
use polyplay_lib::probe::probe_sources;
use polyplay_lib::source::SymphoniaDecoderFactory;
use polyplay_lib::{Orchestrator, PlaybackError, SessionConfig, SourceSettings};

use crate::logging;

pub fn run(args: &ArgMatches) -> Result<i32, PlaybackError> {
    logging::init(args.get_flag("debug"));
    let config = build_config(args)?;

    if args.get_flag("probe-only") {
        let mut failed = false;
        for probe in probe_sources(&config, &SymphoniaDecoderFactory)? {
            match probe.format {
                Ok(format) => println!("{}: {}", probe.path.display(), format),
                Err(err) => {
                    failed = true;
                    println!("{}: {}", probe.path.display(), err);
                }
            }
        }
        return Ok(if failed { 1 } else { 0 });
    }

    for (index, source) in config.sources.iter().enumerate() {
        info!(
            "source {}: {} at {} dB",
            index + 1,
            source.path.display(),
            config.gain_db(index)
        );
    }

    let summary = Orchestrator::play(config, Arc::new(SymphoniaDecoderFactory), rodio_opener())?;
    match summary.clock {
        Some(format) => info!("played at {}", format),
        None => info!("no source produced audio"),
    }
    for step in &summary.teardown {
        debug!("teardown: {}", step);
    }

    Ok(0)
}

/// Merge the optional config file with command-line overrides.
fn build_config(args: &ArgMatches) -> Result<SessionConfig, PlaybackError> {
    let mut config = match args.get_one::<String>("config") {
        Some(path) => SessionConfig::from_json_file(Path::new(path))?,
        None => SessionConfig::default(),
    };

    if let Some(media) = args.get_many::<String>("MEDIA") {
        config.sources = media.map(|path| SourceSettings::new(PathBuf::from(path))).collect();
    }

    let gains = args
        .get_many::<String>("gain")
        .map(|values| values.map(|value| parse_gain(value)).collect::<Result<Vec<_>, _>>())
        .transpose()?
        .unwrap_or_default();
    if gains.len() > config.sources.len() {
        return Err(PlaybackError::InvalidInput(format!(
            "{} gains given for {} sources",
            gains.len(),
            config.sources.len()
        )));
    }
    for (source, gain) in config.sources.iter_mut().zip(gains) {
        source.gain_db = Some(gain);
    }

    if let Some(root) = args.get_one::<String>("root") {
        config.storage_root = PathBuf::from(root);
    }
    if let Some(timeout_ms) = args.get_one::<String>("timeout-ms") {
        config.active_timeout_ms = parse_ms("timeout-ms", timeout_ms)?;
    }
    if let Some(transit_ms) = args.get_one::<String>("transit-ms") {
        config.transit_ms = parse_ms("transit-ms", transit_ms)?;
    }
    if args.get_flag("mono") {
        config.output_channels = OutputChannelMode::Mono;
    }

    config.validate()?;
    Ok(config)
}

fn parse_gain(value: &str) -> Result<f32, PlaybackError> {
    parse_db_str(value)
        .ok_or_else(|| PlaybackError::InvalidInput(format!("invalid gain \"{}\"", value)))
}

fn parse_ms(name: &str, value: &str) -> Result<u64, PlaybackError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| PlaybackError::InvalidInput(format!("--{} expects milliseconds, got \"{}\"", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::build_cli;

    fn parse_args(argv: &[&str]) -> ArgMatches {
        build_cli().get_matches_from(std::iter::once("polyplay").chain(argv.iter().copied()))
    }

    #[test]
    fn gains_apply_in_source_order() {
        let config = build_config(&parse_args(&["bed.mp3", "voice.mp3", "-g", "-3", "-g", "-12db"]))
            .expect("config");
        assert_eq!(config.gain_db(0), -3.0);
        assert_eq!(config.gain_db(1), -12.0);
    }

    #[test]
    fn unset_overlay_gain_keeps_default() {
        let config = build_config(&parse_args(&["bed.mp3", "voice.mp3"])).expect("config");
        assert_eq!(config.gain_db(0), 0.0);
        assert_eq!(config.gain_db(1), -10.0);
    }

    #[test]
    fn overrides_reach_the_config() {
        let config = build_config(&parse_args(&[
            "--root", "/media", "--timeout-ms", "80", "--transit-ms", "200", "--mono", "a.mp3",
        ]))
        .expect("config");
        assert_eq!(config.storage_root, PathBuf::from("/media"));
        assert_eq!(config.active_timeout_ms, 80);
        assert_eq!(config.transit_ms, 200);
        assert_eq!(config.output_channels, OutputChannelMode::Mono);
    }

    #[test]
    fn bad_timeout_is_invalid_input() {
        assert!(matches!(
            build_config(&parse_args(&["--timeout-ms", "soon", "a.mp3"])),
            Err(PlaybackError::InvalidInput(_))
        ));
    }
}
