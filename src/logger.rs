//! Leveled logging sinks
//!
//! Components receive an `Arc<dyn LogSink>` at construction; nothing in the
//! crate logs through global state. Every sink also forwards to `tracing` so
//! the binary's subscriber sees the same lines.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::constants::{MAX_LOG_BYTES, MEMORY_LOG_CAPACITY};

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Debug,
}

impl LogLevel {
    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Destination for leveled log messages
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }
}

fn forward_to_tracing(level: LogLevel, message: &str) {
    match level {
        LogLevel::Info => tracing::info!("{}", message),
        LogLevel::Warning => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
        LogLevel::Debug => tracing::debug!("{}", message),
    }
}

/// Sink that only forwards to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        forward_to_tracing(level, message);
    }
}

/// Daily log file under a directory, with size-based rotation
///
/// Lines look like `[14:03:27] [WARNING]: message`. Debug lines are written
/// only when `verbose` is set; they always reach `tracing`.
pub struct FileLogSink {
    dir: PathBuf,
    verbose: bool,
    // Serializes rotate + append
    write_lock: Mutex<()>,
}

impl FileLogSink {
    pub fn new(dir: impl Into<PathBuf>, verbose: bool) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!("Failed to create log directory {}: {}", dir.display(), e);
        }
        FileLogSink {
            dir,
            verbose,
            write_lock: Mutex::new(()),
        }
    }

    /// Log file for the current local date
    pub fn current_path(&self) -> PathBuf {
        self.dir
            .join(format!("log-{}.txt", Local::now().format("%Y-%m-%d")))
    }

    fn rotate_if_needed(path: &Path) {
        if let Ok(meta) = fs::metadata(path) {
            if meta.len() > MAX_LOG_BYTES {
                let backup = path.with_extension("txt.bak");
                let _ = fs::remove_file(&backup);
                let _ = fs::rename(path, &backup);
            }
        }
    }

    fn format_line(level: LogLevel, message: &str) -> String {
        format!(
            "[{}] [{}]: {}",
            Local::now().format("%H:%M:%S"),
            level.label(),
            message
        )
    }
}

impl LogSink for FileLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        forward_to_tracing(level, message);

        if level == LogLevel::Debug && !self.verbose {
            return;
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let path = self.current_path();
        Self::rotate_if_needed(&path);
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
            let _ = writeln!(file, "{}", Self::format_line(level, message));
        }
    }
}

/// One retained log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// In-memory sink backing a log viewer
///
/// Keeps the most recent entries and remembers whether an error was logged
/// since the last [`reset_error_flag`](Self::reset_error_flag).
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
    capacity: usize,
    has_errors: AtomicBool,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::with_capacity(MEMORY_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MemoryLogSink {
            entries: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            has_errors: AtomicBool::new(false),
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Messages logged at exactly `level`
    pub fn messages_at(&self, level: LogLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == level)
            .map(|e| e.message)
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.has_errors.load(Ordering::SeqCst)
    }

    /// Call before starting a new user-initiated operation
    pub fn reset_error_flag(&self) {
        self.has_errors.store(false, Ordering::SeqCst);
    }
}

impl Default for MemoryLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        forward_to_tracing(level, message);
        if level == LogLevel::Error {
            self.has_errors.store(true, Ordering::SeqCst);
        }
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if entries.len() >= self.capacity {
            entries.remove(0);
        }
        entries.push(LogEntry {
            level,
            message: message.to_string(),
        });
    }
}

/// Fan a message out to several sinks in order
pub struct TeeLogSink {
    sinks: Vec<std::sync::Arc<dyn LogSink>>,
}

impl TeeLogSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn LogSink>>) -> Self {
        TeeLogSink { sinks }
    }
}

impl LogSink for TeeLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        for sink in &self.sinks {
            sink.log(level, message);
        }
    }
}
