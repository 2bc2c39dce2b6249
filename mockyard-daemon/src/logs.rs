//! Per-port log files for mock server output
//!
//! Each port has one append-mode file, `mock-<port>.log`. A [`LogSink`] is
//! opened before the process is spawned and hands out one [`LogWriter`] per
//! output stream. Every write is a single `write_all` of a complete line on an
//! `O_APPEND` handle, so lines from the two streams never interleave mid-line.

use std::fmt::Write as FmtWrite;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::warn;

/// Tag used for lines written by the daemon itself
const DAEMON_TAG: &str = "mockyard";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log file path for a port
pub fn log_path(logs_dir: &Path, port: u16) -> PathBuf {
    logs_dir.join(format!("mock-{}.log", port))
}

/// Refuse to follow a symlink planted at the log path
#[cfg(unix)]
fn validate_not_symlink(path: &Path) -> std::io::Result<()> {
    if let Ok(meta) = std::fs::symlink_metadata(path)
        && meta.file_type().is_symlink()
    {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Log path is a symlink: {:?}", path),
        ));
    }
    Ok(())
}

fn open_append(path: &Path) -> std::io::Result<File> {
    #[cfg(unix)]
    validate_not_symlink(path)?;

    OpenOptions::new().create(true).append(true).open(path)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The log file of one mock server run.
///
/// Writes a `started` marker when opened and a `stopped` marker when closed.
/// Dropping the sink without [`LogSink::close`] still writes the marker.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: Option<File>,
}

impl LogSink {
    /// Open (or create) the log for `port` and record the start of a run
    pub fn open(logs_dir: &Path, port: u16, command: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let path = log_path(logs_dir, port);
        let file = open_append(&path)?;

        let mut sink = Self {
            path,
            file: Some(file),
        };
        sink.marker(&format!("started: {}", command));
        Ok(sink)
    }

    /// Writer for one output stream of the child process
    pub fn writer(&self, stream: LogStream) -> std::io::Result<LogWriter> {
        Ok(LogWriter {
            file: Some(open_append(&self.path)?),
            stream,
            format_buffer: String::with_capacity(256),
        })
    }

    /// Write a daemon-side line into the log
    pub fn marker(&mut self, message: &str) {
        let Some(ref mut file) = self.file else {
            return;
        };
        let line = format!("{} [{}] {}\n", timestamp(), DAEMON_TAG, message);
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!("Failed to write to {:?}: {}", self.path, e);
            self.file = None;
        }
    }

    /// Record the end of the run and close the file
    pub fn close(mut self, reason: &str) {
        self.marker(&format!("stopped: {}", reason));
        self.file = None;
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        if self.file.is_some() {
            self.marker("stopped");
        }
    }
}

/// Writes lines from one output stream, each prefixed with a timestamp and
/// the stream name: `<rfc3339> [stdout] <line>`.
#[derive(Debug)]
pub struct LogWriter {
    file: Option<File>,
    stream: LogStream,
    format_buffer: String,
}

impl LogWriter {
    pub fn write_line(&mut self, line: &str) {
        let Some(ref mut file) = self.file else {
            return;
        };

        self.format_buffer.clear();
        let _ = writeln!(self.format_buffer, "{} [{}] {}", timestamp(), self.stream, line);

        if let Err(e) = file.write_all(self.format_buffer.as_bytes()) {
            // Keep draining the pipe, just stop writing
            warn!("Failed to write {} log line: {}", self.stream, e);
            self.file = None;
        }
    }
}
