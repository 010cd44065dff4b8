use std::fmt::Arguments;
use std::io::Write;

use chrono::{DateTime, Local};
use log::{Level, SetLoggerError};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn format_line(timestamp: DateTime<Local>, level: Level, target: &str, args: &Arguments<'_>) -> String {
    format!("{} [{:<5}] {}: {}", timestamp.format(TIMESTAMP_FORMAT), level, target, args)
}

/// Installs env_logger as the global logger.
///
/// `default_level` is used as the filter when `RUST_LOG` is not set.
pub fn init(default_level: &str) -> Result<(), SetLoggerError> {
    let env = env_logger::Env::default().default_filter_or(default_level);
    env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{}",
                format_line(Local::now(), record.level(), record.target(), record.args())
            )
        })
        .try_init()
}
