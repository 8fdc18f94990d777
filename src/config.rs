use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use serde::Deserialize;

use crate::error::WatchError;

pub const DEFAULT_SEMAPHORE_DIR: &str = "/var/www/html/wsprrypi";
pub const DEFAULT_SHUTDOWN_FILE: &str = "shutdown.semaphore";
pub const DEFAULT_REBOOT_FILE: &str = "reboot.semaphore";
pub const DEFAULT_GPIO_CHIP: &str = "/dev/gpiochip0";

/// Shutdown watcher for Raspberry Pi.
#[derive(Debug, Parser, Clone)]
#[command(name = "wspr-watch", version)]
pub struct Cli {
    /// Start monitoring for shutdown signals and take action.
    #[arg(short, long)]
    pub watch: bool,

    /// Enable debug mode. Logs actions but takes no shutdown actions.
    #[arg(short, long)]
    pub debug: bool,

    /// Enable date/time mode. Log lines carry a timestamp.
    #[arg(short = 'D', long = "date-time", visible_alias = "daemon", alias = "date_time")]
    pub date_time: bool,

    /// GPIO line (BCM numbering) to monitor for a shutdown signal.
    #[arg(short, long, value_name = "GPIOx")]
    pub pin: Option<u32>,

    /// Optional JSON configuration file.
    #[arg(short, long, env = "WSPR_WATCH_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Stop watching after the first action.
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PinConfig {
    #[serde(default = "default_chip")]
    pub chip: String,
    pub line: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl PinConfig {
    pub fn new(line: u32) -> Self {
        Self {
            chip: default_chip(),
            line,
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_chip() -> String {
    DEFAULT_GPIO_CHIP.to_string()
}

fn default_debounce_ms() -> u64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FileConfig {
    pub semaphore_dir: PathBuf,
    pub shutdown_file: String,
    pub reboot_file: String,
    pub poll_interval_ms: u64,
    pub action_delay_secs: u64,
    pub gpio: Option<PinConfig>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            semaphore_dir: PathBuf::from(DEFAULT_SEMAPHORE_DIR),
            shutdown_file: DEFAULT_SHUTDOWN_FILE.to_string(),
            reboot_file: DEFAULT_REBOOT_FILE.to_string(),
            poll_interval_ms: 1000,
            action_delay_secs: 1,
            gpio: None,
        }
    }
}

impl FileConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, WatchError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| WatchError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| WatchError::Config(format!("Invalid config json: {e}")))
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub gpio: Option<PinConfig>,
    pub debug: bool,
    pub poll_interval: Duration,
    pub shutdown_file: PathBuf,
    pub reboot_file: PathBuf,
    pub action_delay_secs: u64,
    pub once: bool,
}

impl WatcherConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, WatchError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load_from_file(path)?,
            None => FileConfig::default(),
        };
        Self::merge(file, cli)
    }

    /// Command-line flags take precedence over the file.
    pub fn merge(file: FileConfig, cli: &Cli) -> Result<Self, WatchError> {
        if file.poll_interval_ms == 0 {
            return Err(WatchError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }

        let gpio = match (cli.pin, file.gpio) {
            (Some(line), Some(pin)) => Some(PinConfig { line, ..pin }),
            (Some(line), None) => Some(PinConfig::new(line)),
            (None, pin) => pin,
        };

        Ok(Self {
            gpio,
            debug: cli.debug,
            poll_interval: Duration::from_millis(file.poll_interval_ms),
            shutdown_file: file.semaphore_dir.join(&file.shutdown_file),
            reboot_file: file.semaphore_dir.join(&file.reboot_file),
            action_delay_secs: file.action_delay_secs,
            once: cli.once,
        })
    }
}
