use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

/// BLE health-device monitor bridging live readings to an openHAB-style sink.
#[derive(Debug, Parser)]
#[command(name = "vitalink", version, about)]
pub struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, short, default_value = "vitalink.json")]
    pub config: PathBuf,

    /// Overrides the log level (otherwise `RUST_LOG`, defaulting to `info`).
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,
}

/// Log verbosity accepted on the command line.
#[derive(Debug, Clone, Copy, Eq, PartialEq, clap::ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn args_default_to_local_config_file() {
        let args = Args::try_parse_from(["vitalink"]).expect("bare invocation should parse");
        assert_eq!(PathBuf::from("vitalink.json"), args.config);
        assert_eq!(None, args.log_level);
    }

    #[test]
    fn args_accept_log_level_override() {
        let args = Args::try_parse_from(["vitalink", "--log-level", "debug"])
            .expect("log-level override should parse");
        assert_eq!(Some(LogLevel::Debug), args.log_level);
        assert_eq!(LevelFilter::DEBUG, LogLevel::Debug.as_level_filter());
    }
}
