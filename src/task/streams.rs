// src/task/streams.rs

//! Captured stdout/stderr of a task.
//!
//! Each pipe is consumed by a small Tokio reader task that forwards complete
//! lines into an unbounded channel. [`Streams::read_available`] drains that
//! channel without ever awaiting, so the polling loop cannot stall on a quiet
//! process.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLine {
    pub source: StreamSource,
    pub text: String,
}

/// Append-only buffer of captured lines, in arrival order.
#[derive(Debug, Default)]
pub struct Streams {
    lines: Vec<StreamLine>,
    rx: Option<mpsc::UnboundedReceiver<StreamLine>>,
}

impl Streams {
    /// Start reader tasks for the given pipes.
    pub(crate) fn attach<O, E>(&mut self, uid: u64, stdout: Option<O>, stderr: Option<E>)
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = stdout {
            spawn_reader(uid, StreamSource::Stdout, stdout, tx.clone());
        }
        if let Some(stderr) = stderr {
            spawn_reader(uid, StreamSource::Stderr, stderr, tx);
        }
        self.rx = Some(rx);
    }

    /// Move every line that has already arrived into the buffer.
    ///
    /// Returns the number of new lines.
    pub(crate) fn read_available(&mut self) -> usize {
        let Some(rx) = self.rx.as_mut() else {
            return 0;
        };

        let before = self.lines.len();
        loop {
            match rx.try_recv() {
                Ok(line) => self.lines.push(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.rx = None;
                    break;
                }
            }
        }
        self.lines.len() - before
    }

    /// Whether a reader may still deliver lines. Turns false once both
    /// pipes reached end-of-file and every line was moved into the buffer.
    pub(crate) fn is_open(&self) -> bool {
        self.rx.is_some()
    }

    pub fn lines(&self) -> &[StreamLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn stdout(&self) -> impl Iterator<Item = &str> {
        self.by_source(StreamSource::Stdout)
    }

    pub fn stderr(&self) -> impl Iterator<Item = &str> {
        self.by_source(StreamSource::Stderr)
    }

    fn by_source(&self, source: StreamSource) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(move |l| l.source == source)
            .map(|l| l.text.as_str())
    }

    /// The last `n` lines of the combined stream.
    pub fn tail(&self, n: usize) -> &[StreamLine] {
        let start = self.lines.len().saturating_sub(n);
        &self.lines[start..]
    }

    /// Combined stream joined with newlines.
    pub fn combined(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn push(&mut self, source: StreamSource, text: &str) {
        self.lines.push(StreamLine {
            source,
            text: text.to_string(),
        });
    }
}

fn spawn_reader<R>(
    uid: u64,
    source: StreamSource,
    pipe: R,
    tx: mpsc::UnboundedSender<StreamLine>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let reader = BufReader::new(pipe);
        let mut lines = reader.lines();

        while let Ok(Some(text)) = lines.next_line().await {
            if tx.send(StreamLine { source, text }).is_err() {
                break;
            }
        }
        debug!(uid, ?source, "stream reader finished");
    });
}
