//! Live tail of the managed service's log.
//!
//! # Design
//! - Every subscription spawns its own tail process and reader task; nothing
//!   is shared, so a slow client only backs up its own channel.
//! - Tails start at "now" (`-n 0`); history is not replayed.
//! - Lines are decoded lossily one at a time; a stray invalid byte costs one
//!   replacement character, not the stream.
//! - Dropping a [`LogSubscription`] aborts its task, which drops the child
//!   handle and kills the tail process.

use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ControlError, ControlResult};

const LINE_BUFFER: usize = 256;

/// Program and arguments that print new log lines until killed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCommand {
    program: String,
    args: Vec<String>,
}

impl LogCommand {
    /// Arbitrary tail command.
    #[must_use]
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `journalctl` following `unit`, message text only, from now on.
    #[must_use]
    pub fn journal(unit: &str) -> Self {
        Self::new(
            "journalctl",
            ["-u", unit, "-f", "-n", "0", "-o", "cat", "--no-pager"],
        )
    }
}

/// Factory for independent log subscriptions.
#[derive(Debug, Clone)]
pub struct LogStreamer {
    command: LogCommand,
}

impl LogStreamer {
    /// Streamer running `command` per subscription.
    #[must_use]
    pub const fn new(command: LogCommand) -> Self {
        Self { command }
    }

    /// Start a new tail. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `CommandSpawn` when the tail program cannot be started.
    pub fn subscribe(&self) -> ControlResult<LogSubscription> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ControlError::CommandSpawn {
                program: self.command.program.clone(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ControlError::invalid("log_command", "no stdout pipe", self.command.program.clone())
        })?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).split(b'\n');
            loop {
                match lines.next_segment().await {
                    Ok(Some(raw)) => {
                        if tx.send(decode_line(&raw)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!(error = %err, "log tail read failed");
                        break;
                    }
                }
            }
            drop(child);
        });
        debug!(program = %self.command.program, "log subscription started");
        Ok(LogSubscription { rx, task })
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// One client's stream of log lines. Ends when the tail process exits.
#[derive(Debug)]
pub struct LogSubscription {
    rx: mpsc::Receiver<String>,
    task: JoinHandle<()>,
}

impl Stream for LogSubscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
