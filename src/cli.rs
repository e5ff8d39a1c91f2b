use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use pincushion::config::Overrides;
use std::path::PathBuf;

pub fn build_cli() -> Command {
    Command::new("pincushion")
        .about("Archive a Pinterest account (boards, pins, images) to disk")
        .arg(
            Arg::new("token")
                .long("token")
                .num_args(1)
                .help("API access token (default: $PINTEREST_TOKEN)"),
        )
        .arg(
            Arg::new("directory")
                .short('d')
                .long("directory")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .help("Destination root directory (default: ./archive)"),
        )
        .arg(
            Arg::new("throttle")
                .long("throttle")
                .help("Pace requests to the server-declared hourly rate limit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .num_args(1)
                .value_parser(value_parser!(usize))
                .help("Concurrent image downloads, 1-8 (default: 4)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .num_args(1)
                .help("Override RUST_LOG level (e.g., info, debug)"),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .help("Print version and exit")
                .action(ArgAction::SetTrue),
        )
}

pub fn overrides(matches: &ArgMatches) -> Overrides {
    Overrides {
        token: matches.get_one::<String>("token").cloned(),
        directory: matches.get_one::<PathBuf>("directory").cloned(),
        throttle: matches.get_flag("throttle"),
        concurrency: matches.get_one::<usize>("concurrency").copied(),
    }
}

pub fn init_logging(level: Option<&str>) {
    // Explicit level wins, then RUST_LOG, then info.
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    if let Some(lvl) = level {
        builder.parse_filters(lvl);
    }
    builder.init();
}
