use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::announcer::{AnnouncerSettings, DEFAULT_TIME_URL};

/// How long the reader sleeps when the device has nothing to say.
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(100);
/// How long the writer waits for operator input before rechecking shutdown.
pub const DEFAULT_INPUT_POLL: Duration = Duration::from_millis(100);

/// Interactive serial terminal that logs every line to a dated file.
///
/// Type a line and press enter to send it (followed by a carriage return).
/// Type `exit`, or press Ctrl-C or Ctrl-D, to leave.
#[derive(Parser, Debug)]
#[command(name = "serlog", version, about)]
pub struct Cli {
    /// List available serial ports and exit.
    #[arg(short, long)]
    pub list: bool,

    /// Serial port to open. Prompted for if omitted.
    #[arg(short, long, env = "SERLOG_PORT")]
    pub port: Option<String>,

    /// Baud rate. Prompted for if omitted.
    #[arg(short, long, env = "SERLOG_BAUD", value_parser = clap::value_parser!(u32).range(1..))]
    pub baud: Option<u32>,

    /// Directory that session logs are written to.
    #[arg(long, env = "SERLOG_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Serial read timeout, in milliseconds.
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub read_timeout_ms: u64,

    /// Periodically send the current network time to the device.
    #[arg(long, env = "SERLOG_TIME_SYNC")]
    pub time_sync: bool,

    /// Time service queried by --time-sync. Must answer with JSON carrying an
    /// RFC 3339 `datetime` field.
    #[arg(long, env = "SERLOG_TIME_URL", default_value = DEFAULT_TIME_URL)]
    pub time_url: String,

    /// Seconds between time announcements.
    #[arg(long, default_value_t = 600, value_parser = clap::value_parser!(u64).range(1..))]
    pub time_interval_secs: u64,

    /// Fetches slower than this (in milliseconds) are not announced.
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    pub time_budget_ms: u64,

    /// Hard timeout for a time service request, in milliseconds.
    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    pub time_timeout_ms: u64,
}

/// Everything needed to open and run a session, once the port and baud rate
/// are known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub port: String,
    pub baud_rate: u32,
    pub log_path: PathBuf,
    pub read_timeout: Duration,
    pub idle_poll: Duration,
    pub input_poll: Duration,
    pub announcer: Option<AnnouncerConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnouncerConfig {
    pub url: String,
    pub request_timeout: Duration,
    pub settings: AnnouncerSettings,
}

impl Cli {
    pub fn session_config(
        &self,
        port: String,
        baud_rate: u32,
        log_path: PathBuf,
    ) -> SessionConfig {
        let announcer = self.time_sync.then(|| AnnouncerConfig {
            url: self.time_url.clone(),
            request_timeout: Duration::from_millis(self.time_timeout_ms),
            settings: AnnouncerSettings {
                interval: Duration::from_secs(self.time_interval_secs),
                budget: Duration::from_millis(self.time_budget_ms),
                ..AnnouncerSettings::default()
            },
        });
        SessionConfig {
            port,
            baud_rate,
            log_path,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            idle_poll: DEFAULT_IDLE_POLL,
            input_poll: DEFAULT_INPUT_POLL,
            announcer,
        }
    }
}
