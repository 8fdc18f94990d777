use std::io::Write;

use env_logger::{Logger, Target};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Errors go to stderr, everything else to stdout.
pub fn stream_for(level: Level) -> Stream {
    match level {
        Level::Error => Stream::Stderr,
        _ => Stream::Stdout,
    }
}

/// Two env_logger instances sharing one filter and format, split by stream.
pub struct SplitLogger {
    stdout: Logger,
    stderr: Logger,
}

impl SplitLogger {
    pub fn new(debug: bool, date_time: bool) -> Self {
        let level = if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };

        Self {
            stdout: build(Target::Stdout, level, date_time),
            stderr: build(Target::Stderr, level, date_time),
        }
    }

    pub fn filter(&self) -> LevelFilter {
        self.stdout.filter()
    }

    pub fn init(self) -> Result<(), SetLoggerError> {
        let max = self.filter();
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max);
        Ok(())
    }
}

fn build(target: Target, level: LevelFilter, date_time: bool) -> Logger {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(target)
        .format(move |buf, record| {
            if date_time {
                writeln!(buf, "{} - {} - {}", buf.timestamp(), record.level(), record.args())
            } else {
                writeln!(buf, "{} - {}", record.level(), record.args())
            }
        })
        .build()
}

impl Log for SplitLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.stdout.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        match stream_for(record.level()) {
            Stream::Stdout => self.stdout.log(record),
            Stream::Stderr => self.stderr.log(record),
        }
    }

    fn flush(&self) {
        self.stdout.flush();
        self.stderr.flush();
    }
}
