//! Terminal logging for solver runs.
//!
//! Log level strings: "debug", "info", "warn", "error", or "off"/"none" to disable
//! logging. A logger that is already installed (by the application or an earlier
//! solve) is kept as is.
use crate::numerical::OCP::ocp_errors::{OcpError, OcpResult};
use chrono::Local;
use log::{LevelFilter, info};
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

/// None means logging is disabled for the run.
pub fn parse_loglevel(level: Option<&str>) -> OcpResult<Option<LevelFilter>> {
    match level.map(|l| l.trim().to_lowercase()) {
        None => Ok(Some(LevelFilter::Info)),
        Some(l) => match l.as_str() {
            "debug" => Ok(Some(LevelFilter::Debug)),
            "info" => Ok(Some(LevelFilter::Info)),
            "warn" => Ok(Some(LevelFilter::Warn)),
            "error" => Ok(Some(LevelFilter::Error)),
            "off" | "none" => Ok(None),
            other => Err(OcpError::config(format!(
                "loglevel must be debug, info, warn, error, off or none, got '{}'",
                other
            ))),
        },
    }
}

/// Install a terminal logger; returns false when another logger was already set.
pub fn init_logger(level: LevelFilter, program: &str) -> bool {
    let logger_instance = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
    match logger_instance {
        Ok(()) => {
            info!(
                "{} started at {} with loglevel {}",
                program,
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                level
            );
            true
        }
        Err(_) => false,
    }
}

/// Parse `level` and install the logger if logging is enabled.
pub fn setup_logging(level: Option<&str>, program: &str) -> OcpResult<()> {
    if let Some(filter) = parse_loglevel(level)? {
        init_logger(filter, program);
    }
    Ok(())
}
