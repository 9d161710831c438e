//! Log level, log format and log destination setup for the binary.
//!
//! Library code only talks to the `log` facade; this module installs the
//! `env_logger` backend behind it.
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Record};
use serde_derive::Deserialize;

/// Log line formats.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `pretty` on stderr, `json` in a log file.
    Auto,
    Pretty,
    /// One JSON object per line.
    #[value(alias = "jsonl")]
    #[serde(alias = "jsonl")]
    Json,
}

impl LogFormat {
    pub fn resolve(self, to_file: bool) -> Self {
        match self {
            LogFormat::Auto if to_file => LogFormat::Json,
            LogFormat::Auto => LogFormat::Pretty,
            other => other,
        }
    }
}

/// Picks the level from the verbosity flags. Silence wins over everything,
/// then quiet, then trace, then debug.
pub fn level_filter(silent: bool, quiet: bool, debug: bool, trace: bool) -> LevelFilter {
    if silent {
        LevelFilter::Off
    } else if quiet {
        LevelFilter::Error
    } else if trace {
        LevelFilter::Trace
    } else if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

fn json_line(record: &Record<'_>) -> String {
    serde_json::json!({
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "level": record.level().as_str(),
        "target": record.target(),
        "message": record.args().to_string(),
    })
    .to_string()
}

fn pretty_line(record: &Record<'_>) -> String {
    let symbol: ColoredString = match record.level() {
        Level::Trace => "[ ]".dimmed(),
        Level::Debug => "[?]".blue(),
        Level::Info => "[+]".green().bold(),
        Level::Warn => "[*]".yellow().bold(),
        Level::Error => "[-]".red().bold(),
    };
    format!("{symbol} {}", record.args())
}

/// Installs the global logger.
///
/// Log lines go to `path` (appending) when given, otherwise to stderr. A log
/// file that cannot be opened is reported and stderr is used instead.
pub fn init(level: LevelFilter, format: LogFormat, path: Option<&Path>) -> Result<(), log::SetLoggerError> {
    let file = path.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                crate::warning!(format!(
                    "Could not open log file {}: {e}. Logging to stderr instead.",
                    path.display()
                ));
                None
            }
        }
    });

    let format = format.resolve(file.is_some());
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        // hickory is very chatty below warn
        .filter_module("hickory_proto", level.min(LevelFilter::Warn))
        .filter_module("hickory_resolver", level.min(LevelFilter::Warn))
        .parse_default_env()
        .format(move |buf, record| match format {
            LogFormat::Json => writeln!(buf, "{}", json_line(record)),
            _ => writeln!(buf, "{}", pretty_line(record)),
        });

    let target: Box<dyn Write + Send> = match file {
        Some(file) => Box::new(file),
        None => Box::new(io::stderr()),
    };
    builder.target(env_logger::Target::Pipe(target));
    builder.try_init()
}
