//! Test logging that is only printed when a test fails.
//!
//! ```ignore
//! let logger = TestLogger::new();
//! logger.info("setup", "Writing report");
//! logger.info_ctx("verify", "Merged", |ctx| {
//!     ctx.push(("updated".into(), "1".into()));
//! });
//! // On panic the harness prints:
//! // [   0.001s] INFO  [setup] Writing report
//! ```

#![allow(dead_code)]

use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Instant;

const REDACTED_VALUE: &str = "[REDACTED]";
const REDACTION_KEYS: [&str; 4] = ["api_key", "authorization", "token", "secret"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO ",
            Self::Warn => "WARN ",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub elapsed_secs: f64,
    pub level: LogLevel,
    pub category: String,
    pub message: String,
    pub context: Vec<(String, String)>,
}

impl LogEntry {
    pub fn format(&self) -> String {
        let mut output = format!(
            "[{:>8.3}s] {} [{}] {}\n",
            self.elapsed_secs,
            self.level.as_str(),
            self.category,
            self.message
        );
        for (key, value) in &self.context {
            let _ = writeln!(output, "           {key} = {value}");
        }
        output
    }
}

pub struct TestLogger {
    entries: Mutex<Vec<LogEntry>>,
    start: Instant,
}

impl Default for TestLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl TestLogger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(64)),
            start: Instant::now(),
        }
    }

    pub fn log(&self, level: LogLevel, category: &str, message: impl Into<String>) {
        self.with_context(level, category, message, |_| {});
    }

    pub fn info(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, category, message);
    }

    pub fn warn(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Warn, category, message);
    }

    pub fn with_context<F>(&self, level: LogLevel, category: &str, message: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        let mut context = Vec::new();
        f(&mut context);
        for (key, value) in &mut context {
            let lowered = key.to_ascii_lowercase();
            if REDACTION_KEYS.iter().any(|needle| lowered.contains(needle)) {
                *value = REDACTED_VALUE.to_string();
            }
        }

        self.entries.lock().unwrap().push(LogEntry {
            elapsed_secs: self.start.elapsed().as_secs_f64(),
            level,
            category: category.to_string(),
            message: message.into(),
            context,
        });
    }

    pub fn info_ctx<F>(&self, category: &str, message: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        self.with_context(LogLevel::Info, category, message, f);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn dump(&self) -> String {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(LogEntry::format)
            .collect()
    }
}
