//! Line-oriented streaming of a container's combined output.
//!
//! Each pipe is drained by its own reader thread which forwards complete
//! lines over a bounded channel. The consumer polls with a timeout so it can
//! interleave cancellation checks with output forwarding.

use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::process::Child;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

/// Tracing target for log streaming.
const LOGS_TARGET: &str = "pernosco_container::logs";

/// Lines buffered between the reader threads and the consumer.
const CHANNEL_CAPACITY: usize = 64;

type LineMessage = io::Result<Vec<u8>>;

/// Result of polling a [`LogStream`].
#[derive(Debug, PartialEq, Eq)]
pub enum LogPoll {
    /// A complete line, including its trailing newline when present.
    Line(Vec<u8>),
    /// No line arrived within the timeout.
    Pending,
    /// Every source reached end of file.
    Closed,
}

/// Combined output of a followed container.
pub struct LogStream {
    receiver: Receiver<LineMessage>,
    follower: Option<Child>,
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LogStream")
            .field("follower", &self.follower.as_ref().map(Child::id))
            .finish_non_exhaustive()
    }
}

impl LogStream {
    /// Streams the stdout and stderr pipes of a follower process.
    ///
    /// The follower is killed and reaped when the stream is dropped.
    #[must_use]
    pub fn from_child(mut child: Child) -> Self {
        let mut sources: Vec<Box<dyn Read + Send>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            sources.push(Box::new(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            sources.push(Box::new(stderr));
        }
        let mut stream = Self::from_readers(sources);
        stream.follower = Some(child);
        stream
    }

    /// Streams arbitrary readers, one reader thread each.
    #[must_use]
    pub fn from_readers(sources: Vec<Box<dyn Read + Send>>) -> Self {
        let (sender, receiver) = sync_channel(CHANNEL_CAPACITY);
        for source in sources {
            let line_sender = sender.clone();
            thread::spawn(move || pump_lines(source, &line_sender));
        }
        Self {
            receiver,
            follower: None,
        }
    }

    /// Waits up to `timeout` for the next line.
    ///
    /// # Errors
    ///
    /// Returns the read error reported by one of the sources.
    pub fn poll(&self, timeout: Duration) -> io::Result<LogPoll> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(line)) => Ok(LogPoll::Line(line)),
            Ok(Err(err)) => Err(err),
            Err(RecvTimeoutError::Timeout) => Ok(LogPoll::Pending),
            Err(RecvTimeoutError::Disconnected) => Ok(LogPoll::Closed),
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        let Some(mut child) = self.follower.take() else {
            return;
        };
        if let Err(err) = child.kill()
            && err.kind() != ErrorKind::InvalidInput
        {
            debug!(target: LOGS_TARGET, error = %err, "log follower already gone");
        }
        if let Err(err) = child.wait() {
            warn!(target: LOGS_TARGET, error = %err, "failed to reap log follower");
        }
    }
}

fn pump_lines(source: Box<dyn Read + Send>, sender: &SyncSender<LineMessage>) {
    let mut reader = BufReader::new(source);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if sender.send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                if sender.send(Err(err)).is_err() {
                    debug!(target: LOGS_TARGET, "log consumer went away after a read error");
                }
                break;
            }
        }
    }
}
