//! Command-line surface (spec §6, §4.11 "CLI & process bootstrap"): argument
//! parsing only. Logging setup and the daemon's run loop live in [`crate::boot`].

use clap::{Parser, ValueEnum};

use crate::protocol::fsm::MuxConfigMode;

/// Per-port MUX cable ownership control-plane daemon for dual-homed ToR switches.
#[derive(Parser, Debug)]
#[command(name = "linkmgrd", version, about)]
pub struct Args {
    /// Log severity.
    #[arg(short = 'v', long = "verbose", value_enum, default_value_t = LogLevel::Info)]
    pub verbose: LogLevel,

    /// Default CLI-forced mode for ports not already configured in
    /// `CONFIG_DB/MUX_CABLE`.
    #[arg(short = 'm', long = "default-mode", value_enum, default_value_t = DefaultMode::Auto)]
    pub default_mode: DefaultMode,

    /// Which `Db` implementation to run against. Only `memory` ships built
    /// without extra setup; `redis` requires the `redis-backend` feature and
    /// `--db-url`.
    #[arg(long = "db-backend", value_enum, default_value_t = DbBackend::Memory)]
    pub db_backend: DbBackend,

    /// Connection URL for `--db-backend redis`.
    #[arg(long = "db-url")]
    pub db_url: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    /// `log` has no `Fatal` level; it maps to `Error` severity (the process
    /// exit is what actually distinguishes a fatal condition, not the log
    /// line itself).
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warning => log::LevelFilter::Warn,
            LogLevel::Error | LogLevel::Fatal => log::LevelFilter::Error,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultMode {
    Auto,
    Active,
    Manual,
}

impl DefaultMode {
    pub fn to_mux_config_mode(self) -> MuxConfigMode {
        match self {
            DefaultMode::Auto => MuxConfigMode::Auto,
            DefaultMode::Active => MuxConfigMode::Active,
            DefaultMode::Manual => MuxConfigMode::Manual,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbBackend {
    Memory,
    Redis,
}

/// Parses `std::env::args`. Clap exits the process with a non-zero status
/// and a usage message on its own for `-h`/parse errors, satisfying spec
/// §6's "non-zero on argument parse error" without extra handling here.
pub fn parse_args() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_are_auto_mode_info_verbosity_memory_backend() {
        let args = Args::parse_from(["linkmgrd"]);
        assert_eq!(args.verbose, LogLevel::Info);
        assert_eq!(args.default_mode, DefaultMode::Auto);
        assert_eq!(args.db_backend, DbBackend::Memory);
    }

    #[test]
    fn verbose_flag_is_parsed() {
        let args = Args::parse_from(["linkmgrd", "-v", "debug"]);
        assert_eq!(args.verbose, LogLevel::Debug);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let result = Args::try_parse_from(["linkmgrd", "--not-a-flag"]);
        assert!(result.is_err());
    }
}
