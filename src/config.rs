//! Command-line surface for the polling process.

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "smapoll", about = "Polls SMA Sunnyboy inverters over SWR-NET")]
pub struct Args {
    /// Either `host:port` (TCP-to-serial bridge) or a local device path.
    pub device: String,

    /// Poll interval, in seconds.
    #[arg(short = 'i', long, default_value_t = 60)]
    pub interval: u32,

    /// Close the transport between cycles.
    #[arg(short = 'c', long = "close-each-cycle")]
    pub close_each_cycle: bool,

    /// Log every inbound/outbound frame under this directory as
    /// `<unix_ts>.from` / `<unix_ts>.to`.
    #[arg(short = 'l', long = "log-dir")]
    pub log_dir: Option<std::path::PathBuf>,

    /// Write the process PID to this file.
    #[arg(short = 'p', long = "pid-file")]
    pub pid_file: Option<std::path::PathBuf>,

    /// Verbose output (info level).
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Very verbose output (debug level).
    #[arg(short = 'V')]
    pub very_verbose: bool,

    /// Postgres connection string for the `stats`/`comments` tables.
    #[arg(long = "database-url")]
    pub database_url: String,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        if self.very_verbose {
            LevelFilter::DEBUG
        } else if self.verbose {
            LevelFilter::INFO
        } else {
            LevelFilter::WARN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_verbosity_is_warn() {
        let args = Args {
            device: "/dev/ttyS0".into(),
            interval: 60,
            close_each_cycle: false,
            log_dir: None,
            pid_file: None,
            verbose: false,
            very_verbose: false,
            database_url: "postgres://localhost/sma".into(),
        };
        assert_eq!(args.log_level(), LevelFilter::WARN);
    }

    #[test]
    fn very_verbose_wins_over_verbose() {
        let args = Args {
            device: "/dev/ttyS0".into(),
            interval: 60,
            close_each_cycle: false,
            log_dir: None,
            pid_file: None,
            verbose: true,
            very_verbose: true,
            database_url: "postgres://localhost/sma".into(),
        };
        assert_eq!(args.log_level(), LevelFilter::DEBUG);
    }
}
