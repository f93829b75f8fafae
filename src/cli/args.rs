//! CLI argument definitions for `polyplay`.

use clap::{Arg, ArgAction, Command};

/// Build the CLI argument parser.
pub fn build_cli() -> Command {
    Command::new("polyplay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Play several audio files through one weighted downmix")
        .arg(
            Arg::new("gain")
                .long("gain")
                .short('g')
                .value_name("DB")
                .action(ArgAction::Append)
                .allow_hyphen_values(true)
                .help("Mixing gain per source in order, e.g. 0, -10 or \"-6db\""),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Session configuration file (JSON)"),
        )
        .arg(
            Arg::new("root")
                .long("root")
                .value_name("DIR")
                .help("Directory relative media paths are resolved against"),
        )
        .arg(
            Arg::new("timeout-ms")
                .long("timeout-ms")
                .value_name("MS")
                .help("Per-source read timeout once mixing starts"),
        )
        .arg(
            Arg::new("transit-ms")
                .long("transit-ms")
                .value_name("MS")
                .help("Length of the gain ramp when mixing starts"),
        )
        .arg(
            Arg::new("mono")
                .long("mono")
                .action(ArgAction::SetTrue)
                .help("Fold the mix to mono on every output channel"),
        )
        .arg(
            Arg::new("probe-only")
                .long("probe-only")
                .action(ArgAction::SetTrue)
                .help("Only probe each source for its stream format"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Show debug output"),
        )
        .arg(
            Arg::new("MEDIA")
                .help("Media files; the first one is the primary source")
                .action(ArgAction::Append)
                .index(1),
        )
}
