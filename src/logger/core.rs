use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use colored::Colorize;
use once_cell::sync::Lazy;

use super::levels::LogLevel;
use super::tags::LogTag;

const LOG_DIR: &str = "data/logs";
const LOG_FILE: &str = "data/logs/spotbot.log";

#[derive(Debug, Default)]
struct LoggerConfig {
    debug_flags: HashSet<String>,
    verbose: bool,
    quiet: bool,
}

static CONFIG: Lazy<RwLock<LoggerConfig>> = Lazy::new(|| RwLock::new(LoggerConfig::default()));

static FILE_SINK: Lazy<Mutex<Option<BufWriter<File>>>> = Lazy::new(|| Mutex::new(None));

/// Scan command-line arguments for --debug-<tag>, --verbose and --quiet.
pub(super) fn init_from_args() {
    let args: Vec<String> = std::env::args().collect();
    let mut config = LoggerConfig::default();
    for arg in &args {
        if arg.starts_with("--debug-") {
            config.debug_flags.insert(arg.clone());
        }
    }
    config.verbose = args.iter().any(|a| a == "--verbose");
    config.quiet = args.iter().any(|a| a == "--quiet");
    if let Ok(mut current) = CONFIG.write() {
        *current = config;
    }
}

pub(super) fn init_file_output() {
    if fs::create_dir_all(LOG_DIR).is_err() {
        return;
    }
    if let Ok(file) = OpenOptions::new().create(true).append(true).open(LOG_FILE) {
        if let Ok(mut sink) = FILE_SINK.lock() {
            *sink = Some(BufWriter::new(file));
        }
    }
}

pub(super) fn flush_file_output() {
    if let Ok(mut sink) = FILE_SINK.lock() {
        if let Some(writer) = sink.as_mut() {
            let _ = writer.flush();
        }
    }
}

fn level_enabled(tag: LogTag, level: LogLevel) -> bool {
    let config = match CONFIG.read() {
        Ok(config) => config,
        Err(_) => return true,
    };
    match level {
        LogLevel::Error => true,
        LogLevel::Warning | LogLevel::Info => !config.quiet,
        LogLevel::Debug => config.verbose || config.debug_flags.contains(tag.debug_flag()),
        LogLevel::Verbose => config.verbose,
    }
}

pub(super) fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !level_enabled(tag, level) {
        return;
    }

    let timestamp = Utc::now().format("%H:%M:%S%.3f");
    let line = format!("{timestamp} [{:<5}] [{}] {message}", level.label(), tag.as_str());

    let colored_line = line.as_str().color(level.color());
    if level <= LogLevel::Warning {
        eprintln!("{colored_line}");
    } else {
        println!("{colored_line}");
    }

    if let Ok(mut sink) = FILE_SINK.lock() {
        if let Some(writer) = sink.as_mut() {
            let _ = writeln!(writer, "{line}");
            if level == LogLevel::Error {
                let _ = writer.flush();
            }
        }
    }
}
