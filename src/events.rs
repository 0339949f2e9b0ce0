use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Severity of a diagnostic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Error,
    Network,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Error => "ERROR",
            Level::Network => "NET",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub level: Level,
    pub tag: String, // e.g. "tape", "loop", "stream", "socket"
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

impl Event {
    pub fn new(level: Level, tag: impl Into<String>, message: impl Into<String>) -> Self {
        let now: DateTime<Utc> = Utc::now();

        Self {
            level,
            tag: tag.into(),
            message: message.into(),
            timestamp: now.to_rfc3339(),
        }
    }

    pub fn debug(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Debug, tag, message)
    }

    pub fn info(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Info, tag, message)
    }

    pub fn error(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Error, tag, message)
    }

    pub fn network(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Network, tag, message)
    }

    /// Wall-clock part of the timestamp, `HH:MM:SS`
    fn clock(&self) -> &str {
        self.timestamp
            .split('T')
            .nth(1)
            .unwrap_or(&self.timestamp)
            .split('.')
            .next()
            .unwrap_or("")
    }

    fn pretty_line(&self, timestamps: bool) -> String {
        let tag = match self.level {
            Level::Debug => format!("[{}]", self.level).cyan(),
            Level::Info => format!("[{}]", self.level).green(),
            Level::Error => format!("[{}]", self.level).red().bold(),
            Level::Network => format!("[{}]", self.level).magenta(),
        };

        if timestamps {
            format!("{} {} [{}] {}", self.clock().dimmed(), tag, self.tag, self.message)
        } else {
            format!("{} [{}] {}", tag, self.tag, self.message)
        }
    }

    fn plain_line(&self) -> String {
        format!(
            "{} [{}] [{}] {}",
            self.timestamp, self.level, self.tag, self.message
        )
    }
}

/// Receiver of diagnostic events raised by the engine and its streams
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl EventSink for Silent {
    fn emit(&mut self, _event: Event) {}
}

/// Sink that keeps events in memory
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    pub events: Vec<Event>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, level: Level) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.message.as_str())
            .collect()
    }
}

impl EventSink for Recorder {
    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// Renders events on stderr. Each event is also traced through the `log`
/// facade, below any level the binary enables by default, so stderr never
/// carries the same event twice.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    format: LogFormat,
    timestamps: bool,
    log_file: Option<String>,
}

impl Diagnostics {
    pub fn new(format: LogFormat, timestamps: bool) -> Self {
        Self {
            format,
            timestamps,
            log_file: None,
        }
    }

    pub fn with_log_file(mut self, path: Option<String>) -> Self {
        self.log_file = path;
        self
    }

    fn render(&self, event: &Event) -> io::Result<()> {
        let line = match self.format {
            LogFormat::Pretty => event.pretty_line(self.timestamps),
            LogFormat::Json => serde_json::to_string(event)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
        };
        eprintln!("{}", line);

        if let Some(file_path) = &self.log_file {
            let plain = match self.format {
                LogFormat::Pretty => event.plain_line(),
                LogFormat::Json => line,
            };
            append_to_file(file_path, &plain)?;
        }

        Ok(())
    }
}

impl EventSink for Diagnostics {
    fn emit(&mut self, event: Event) {
        let target = match event.level {
            Level::Network => "bfnet::net",
            _ => "bfnet",
        };
        log::trace!(target: target, "{} [{}] {}", event.level, event.tag, event.message);

        if let Err(e) = self.render(&event) {
            log::warn!("failed to write diagnostic event: {}", e);
        }
    }
}

fn append_to_file(file_path: &str, content: &str) -> io::Result<()> {
    let path = Path::new(file_path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", content)?;

    Ok(())
}
