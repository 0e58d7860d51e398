//! Thin wrapper around the `log` facade, generalizing dagrs's own
//! `utils::log` module (`LogLevel`, `init_logger`) to anadama's needs.

use std::fs::File;
use std::path::Path;

use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Installs a terminal logger, plus a file logger if `file` is given.
///
/// Safe to call more than once (e.g. from several `#[test]` functions in the
/// same binary); later calls are ignored rather than panicking.
pub fn init_logger(level: LogLevel, file: Option<&Path>) {
    let filter = level.to_filter();
    let term = TermLogger::new(filter, Config::default(), TerminalMode::Mixed, ColorChoice::Auto);

    let result = match file.and_then(|p| File::create(p).ok()) {
        Some(f) => CombinedLogger::init(vec![term, WriteLogger::new(filter, Config::default(), f)]),
        None => CombinedLogger::init(vec![term]),
    };
    if let Err(e) = result {
        log::debug!("logger already initialized: {e}");
    }
}

pub fn info(msg: impl AsRef<str>) {
    log::info!("{}", msg.as_ref());
}

pub fn warn(msg: impl AsRef<str>) {
    log::warn!("{}", msg.as_ref());
}

pub fn error(msg: impl AsRef<str>) {
    log::error!("{}", msg.as_ref());
}

pub fn debug(msg: impl AsRef<str>) {
    log::debug!("{}", msg.as_ref());
}
