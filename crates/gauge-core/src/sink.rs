//! Output destinations for progress lines.
//!
//! A sink is either *interactive* (the registry overwrites the current line in
//! place) or *durable* (every line is appended and flushed). Interactivity is
//! fixed when the sink is constructed; the registry never inspects the stream.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

pub trait Sink: Send {
    fn write(&mut self, text: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    fn is_interactive(&self) -> bool;
}

/// Sinks shared between several registries (e.g. one terminal for two workers).
impl<S: Sink + ?Sized> Sink for Arc<Mutex<S>> {
    fn write(&mut self, text: &str) -> io::Result<()> {
        self.lock().unwrap_or_else(PoisonError::into_inner).write(text)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }

    fn is_interactive(&self) -> bool {
        self.lock().unwrap_or_else(PoisonError::into_inner).is_interactive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    Stdout,
    Stderr,
}

/// Process stdout / stderr.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    stream: ConsoleStream,
    interactive: bool,
}

impl ConsoleSink {
    pub fn new(stream: ConsoleStream, interactive: bool) -> Self {
        Self { stream, interactive }
    }

    pub fn stdout(interactive: bool) -> Self {
        Self::new(ConsoleStream::Stdout, interactive)
    }

    /// Stdout sink that is interactive iff stdout is a terminal right now.
    ///
    /// The check happens once, here; the decision does not change afterwards.
    pub fn detect_stdout() -> Self {
        Self::stdout(io::stdout().is_terminal())
    }
}

impl Sink for ConsoleSink {
    fn write(&mut self, text: &str) -> io::Result<()> {
        match self.stream {
            ConsoleStream::Stdout => io::stdout().lock().write_all(text.as_bytes()),
            ConsoleStream::Stderr => io::stderr().lock().write_all(text.as_bytes()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream {
            ConsoleStream::Stdout => io::stdout().flush(),
            ConsoleStream::Stderr => io::stderr().flush(),
        }
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}

/// Any `Write` stream, typically a log file.
#[derive(Debug)]
pub struct StreamSink<W> {
    writer: W,
    interactive: bool,
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(writer: W, interactive: bool) -> Self {
        Self { writer, interactive }
    }

    pub fn durable(writer: W) -> Self {
        Self::new(writer, false)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl StreamSink<File> {
    /// Durable sink appending to `path`, creating the file if needed.
    pub fn append_to(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::durable(file))
    }
}

impl<W: Write + Send> Sink for StreamSink<W> {
    fn write(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}

#[derive(Debug, Default)]
struct Capture {
    writes: Vec<String>,
    flushes: usize,
}

/// In-memory sink keeping every write separately.
///
/// Clones share the same buffer, so a test can keep one handle and attach the
/// other to a registry.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    capture: Arc<Mutex<Capture>>,
    interactive: bool,
}

impl MemorySink {
    pub fn interactive() -> Self {
        Self { capture: Arc::default(), interactive: true }
    }

    pub fn durable() -> Self {
        Self { capture: Arc::default(), interactive: false }
    }

    /// Each `write` call, in order.
    pub fn writes(&self) -> Vec<String> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner).writes.clone()
    }

    /// All writes concatenated.
    pub fn contents(&self) -> String {
        self.writes().concat()
    }

    pub fn flush_count(&self) -> usize {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner).flushes
    }
}

impl Sink for MemorySink {
    fn write(&mut self, text: &str) -> io::Result<()> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner).writes.push(text.to_string());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner).flushes += 1;
        Ok(())
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}
