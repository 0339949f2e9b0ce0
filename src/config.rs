use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::events::{Diagnostics, EventSink, LogFormat, Silent};
use crate::vm::Dialect;

/// Runtime settings for one VM invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Render diagnostic events on stderr
    pub diagnostics: bool,
    /// Prefix rendered events with a wall-clock time
    pub timestamps: bool,
    pub log_format: LogFormat,
    pub log_file: Option<String>,
    pub dialect: Dialect,
    /// Socket read/write timeout; `None` keeps network I/O fully blocking
    pub io_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            diagnostics: false,
            timestamps: false,
            log_format: LogFormat::Pretty,
            log_file: None,
            dialect: Dialect::Extended,
            io_timeout: None,
        }
    }
}

/// Settings taken from the process environment at first use
pub static ENV_CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unparseable values keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("BFNET_LOG") {
            config.diagnostics = parse_flag("BFNET_LOG", &v);
        }
        if let Some(v) = lookup("BFNET_LOG_TIMESTAMPS") {
            config.timestamps = parse_flag("BFNET_LOG_TIMESTAMPS", &v);
        }
        if let Some(v) = lookup("BFNET_LOG_FORMAT") {
            match LogFormat::from_str(&v) {
                Some(format) => config.log_format = format,
                None => log::warn!("ignoring BFNET_LOG_FORMAT={:?}", v),
            }
        }
        if let Some(v) = lookup("BFNET_LOG_FILE") {
            if !v.trim().is_empty() {
                config.log_file = Some(v);
            }
        }
        if let Some(v) = lookup("BFNET_DIALECT") {
            match Dialect::from_str(&v) {
                Some(dialect) => config.dialect = dialect,
                None => log::warn!("ignoring BFNET_DIALECT={:?}", v),
            }
        }
        if let Some(v) = lookup("BFNET_IO_TIMEOUT_MS") {
            match v.trim().parse::<u64>() {
                Ok(0) => config.io_timeout = None,
                Ok(ms) => config.io_timeout = Some(Duration::from_millis(ms)),
                Err(_) => log::warn!("ignoring BFNET_IO_TIMEOUT_MS={:?}", v),
            }
        }

        config
    }

    /// The event sink these settings describe
    pub fn sink(&self) -> Box<dyn EventSink> {
        if self.diagnostics {
            Box::new(
                Diagnostics::new(self.log_format, self.timestamps)
                    .with_log_file(self.log_file.clone()),
            )
        } else {
            Box::new(Silent)
        }
    }
}

fn parse_flag(key: &str, value: &str) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" | "" => false,
        _ => {
            log::warn!("ignoring {}={:?}", key, value);
            false
        }
    }
}
