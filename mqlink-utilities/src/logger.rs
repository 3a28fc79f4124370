use std::{env, str::FromStr, time::SystemTime};

use log::LevelFilter;

/// Environment variable overriding the default `info` level.
pub const LOG_LEVEL_VAR: &str = "MQLINK_LOG";
/// Environment variable overriding the log file path.
pub const LOG_FILE_VAR: &str = "MQLINK_LOG_FILE";
const DEFAULT_LOG_FILE: &str = "output.log";

pub fn setup_logger() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339_seconds(SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level_from_env())
        // HTTP internals log every connection at debug.
        .level_for("hyper", LevelFilter::Warn)
        .level_for("hyper_util", LevelFilter::Warn)
        .chain(std::io::stdout())
        .chain(fern::log_file(
            env::var(LOG_FILE_VAR).unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string()),
        )?)
        .apply()?;
    Ok(())
}

fn level_from_env() -> LevelFilter {
    env::var(LOG_LEVEL_VAR)
        .ok()
        .and_then(|value| parse_level(&value))
        .unwrap_or(LevelFilter::Info)
}

fn parse_level(value: &str) -> Option<LevelFilter> {
    LevelFilter::from_str(value.trim()).ok()
}
