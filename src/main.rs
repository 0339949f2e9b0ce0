use bfnet::config::ENV_CONFIG;
use bfnet::events::LogFormat;
use bfnet::{Config, Dialect, Program, VMError, VM};
use clap::{Arg, ArgMatches, Command};
use std::process;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
enum AppError {
    #[error("VM error: {0}")]
    VM(#[from] VMError),
}

fn cli() -> Command {
    Command::new("bfnet")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Tape-based byte VM with optional TCP-backed I/O")
        .arg(
            Arg::new("program")
                .value_name("FILE")
                .help("Program source to execute")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Print diagnostic events to stderr")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("timestamps")
                .short('t')
                .long("timestamps")
                .help("Prefix diagnostic events with the time of day")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Render diagnostic events as JSON lines")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("PATH")
                .help("Also append diagnostic events to a file"),
        )
        .arg(
            Arg::new("classic")
                .long("classic")
                .help("Treat the network symbols ^ & % ! as comments")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("io-timeout")
                .long("io-timeout")
                .value_name("MS")
                .help("Socket read/write timeout in milliseconds (default: block forever)")
                .value_parser(clap::value_parser!(u64)),
        )
}

/// Layer command-line flags over the environment settings
fn build_config(matches: &ArgMatches, base: &Config) -> Config {
    let mut config = base.clone();

    if matches.get_flag("debug") {
        config.diagnostics = true;
    }
    if matches.get_flag("timestamps") {
        config.timestamps = true;
    }
    if matches.get_flag("json") {
        config.log_format = LogFormat::Json;
    }
    if let Some(path) = matches.get_one::<String>("log-file") {
        config.log_file = Some(path.clone());
    }
    if matches.get_flag("classic") {
        config.dialect = Dialect::Classic;
    }
    if let Some(&ms) = matches.get_one::<u64>("io-timeout") {
        config.io_timeout = if ms == 0 {
            None
        } else {
            Some(Duration::from_millis(ms))
        };
    }

    config
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let matches = cli().get_matches();
    let config = build_config(&matches, &ENV_CONFIG);

    let program_path = match matches.get_one::<String>("program") {
        Some(path) => path,
        None => {
            eprintln!("Usage: bfnet <FILE>");
            process::exit(2);
        }
    };

    if let Err(err) = run_program(program_path, &config) {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}

fn run_program(program_path: &str, config: &Config) -> Result<(), AppError> {
    let program = Program::load(program_path, config.dialect)?;
    if program.is_empty() {
        log::debug!("{} is empty", program_path);
    }

    let mut vm = VM::with_stdio(program)?
        .with_events(config.sink())
        .with_io_timeout(config.io_timeout);

    let stats = vm.run()?;
    log::debug!(
        "{}: {} steps, {} bytes out, {} bytes in",
        program_path,
        stats.steps,
        stats.bytes_out,
        stats.bytes_in
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_base() {
        let matches = cli()
            .try_get_matches_from(["bfnet", "-d", "--json", "--classic", "--io-timeout", "40", "p.bf"])
            .unwrap();
        let config = build_config(&matches, &Config::default());
        assert!(config.diagnostics);
        assert!(!config.timestamps);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.dialect, Dialect::Classic);
        assert_eq!(config.io_timeout, Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_base_kept_without_flags() {
        let base = Config {
            timestamps: true,
            ..Config::default()
        };
        let matches = cli().try_get_matches_from(["bfnet", "p.bf"]).unwrap();
        assert_eq!(build_config(&matches, &base), base);
    }

    #[test]
    fn test_extra_positional_is_rejected() {
        assert!(cli().try_get_matches_from(["bfnet", "a.bf", "b.bf"]).is_err());
        assert!(cli().try_get_matches_from(["bfnet"]).is_err());
    }
}
