//! Routing of worker output lines to host sinks.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Lines starting with this marker are treated as worker errors.
pub const ERROR_MARKER: &[u8] = b"ERROR";

/// Forwards worker output to stdout, stderr and an optional log file.
///
/// Error lines always reach `stderr`. With a log file configured every line
/// is appended to it and stdout stays quiet; without one, the remaining lines
/// go to `stdout`.
pub struct LogRouter<O, E> {
    stdout: O,
    stderr: E,
    log_file: Option<Box<dyn Write + Send>>,
}

impl<O, E> fmt::Debug for LogRouter<O, E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LogRouter")
            .field("log_file", &self.log_file.is_some())
            .finish_non_exhaustive()
    }
}

impl<O: Write, E: Write> LogRouter<O, E> {
    /// Routes to the given stdout and stderr sinks.
    #[must_use]
    pub const fn new(stdout: O, stderr: E) -> Self {
        Self {
            stdout,
            stderr,
            log_file: None,
        }
    }

    /// Additionally appends every line to `log_file`.
    #[must_use]
    pub fn with_log_file(mut self, log_file: Box<dyn Write + Send>) -> Self {
        self.log_file = Some(log_file);
        self
    }

    /// Forwards one line, appending a newline when it lacks one.
    ///
    /// # Errors
    ///
    /// Returns the first write failure from any sink.
    pub fn route(&mut self, line: &[u8]) -> io::Result<()> {
        let is_error = line.starts_with(ERROR_MARKER);
        if is_error {
            write_line(&mut self.stderr, line)?;
        }
        match self.log_file.as_mut() {
            Some(file) => write_line(file, line),
            None if !is_error => write_line(&mut self.stdout, line),
            None => Ok(()),
        }
    }

    /// Writes a supervisor message to stdout, bypassing the log file.
    ///
    /// # Errors
    ///
    /// Returns the write failure, if any.
    pub fn announce(&mut self, message: &str) -> io::Result<()> {
        write_line(&mut self.stdout, message.as_bytes())
    }
}

fn write_line<W: Write + ?Sized>(sink: &mut W, line: &[u8]) -> io::Result<()> {
    sink.write_all(line)?;
    if !line.ends_with(b"\n") {
        sink.write_all(b"\n")?;
    }
    sink.flush()
}

/// Opens `path` for appending, creating it when missing.
///
/// # Errors
///
/// Returns the error raised while opening the file.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
