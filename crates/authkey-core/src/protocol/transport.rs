//! Framed transport
//!
//! Line-oriented read/write primitives over an async byte stream. A read
//! accumulates device output until a [`Terminator`] shows up or a deadline
//! elapses; whatever arrived after the terminator stays buffered for the next
//! read.

use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{ProtocolError, END_OF_RESPONSE};

/// Where a read stops: a literal string or a regex pattern.
#[derive(Debug, Clone)]
pub enum Terminator {
    /// Exact text
    Literal(String),
    /// First regex match
    Pattern(Regex),
}

impl Terminator {
    /// Literal terminator
    pub fn literal(text: impl Into<String>) -> Self {
        Terminator::Literal(text.into())
    }

    /// Compile a regex terminator
    pub fn pattern(pattern: &str) -> Result<Self, ProtocolError> {
        Ok(Terminator::Pattern(Regex::new(pattern)?))
    }

    /// Byte range of the first occurrence in `haystack`
    pub fn find(&self, haystack: &str) -> Option<(usize, usize)> {
        match self {
            Terminator::Literal(lit) if lit.is_empty() => None,
            Terminator::Literal(lit) => haystack.find(lit.as_str()).map(|i| (i, i + lit.len())),
            Terminator::Pattern(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }

    /// Whether the terminator matches zero characters, which would end every
    /// read immediately
    pub fn matches_empty(&self) -> bool {
        match self {
            Terminator::Literal(lit) => lit.is_empty(),
            Terminator::Pattern(re) => re.find_iter("x").any(|m| m.is_empty()) || re.is_match(""),
        }
    }

    /// Regex source usable inside a larger alternation
    pub fn regex_source(&self) -> String {
        match self {
            Terminator::Literal(lit) => regex::escape(lit),
            Terminator::Pattern(re) => re.as_str().to_string(),
        }
    }

    /// Remove the last occurrence of the terminator from `text`.
    ///
    /// Reads end right after the terminator, so the last occurrence is the
    /// one that ended the read.
    pub fn strip_from(&self, text: &str) -> String {
        let last = match self {
            Terminator::Literal(lit) if lit.is_empty() => None,
            Terminator::Literal(lit) => text.rfind(lit.as_str()).map(|i| (i, i + lit.len())),
            Terminator::Pattern(re) => re.find_iter(text).last().map(|m| (m.start(), m.end())),
        };
        match last {
            Some((start, end)) => {
                let mut out = String::with_capacity(text.len() - (end - start));
                out.push_str(&text[..start]);
                out.push_str(&text[end..]);
                out
            }
            None => text.to_string(),
        }
    }
}

impl Default for Terminator {
    fn default() -> Self {
        Terminator::literal(END_OF_RESPONSE)
    }
}

impl From<&str> for Terminator {
    fn from(text: &str) -> Self {
        Terminator::literal(text)
    }
}

/// Accumulates raw input and hands out text up to a terminator.
///
/// Bytes are decoded as UTF-8 incrementally; a multi-byte character split
/// across two reads is held back until complete, invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    text: String,
    pending: Vec<u8>,
}

impl ReadBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    self.text.push_str(s);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // incomplete sequence at the tail
                            self.pending.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Take everything up to and including the first terminator match
    pub fn take_through(&mut self, terminator: &Terminator) -> Option<String> {
        let (_, end) = terminator.find(&self.text)?;
        let rest = self.text.split_off(end);
        Some(std::mem::replace(&mut self.text, rest))
    }

    /// Decoded text not yet handed out
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// No decoded text and no partial character held back
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.pending.is_empty()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.text.clear();
        self.pending.clear();
    }
}

/// An open, line-oriented channel to the device
#[async_trait]
pub trait Transport: Send {
    /// Write the data and wait until it has been flushed
    async fn write_str(&mut self, data: &str) -> Result<(), ProtocolError>;

    /// Read until `terminator` matches. `None` deadline waits forever.
    ///
    /// Fails with [`ProtocolError::Timeout`] when the deadline elapses; input
    /// received so far stays buffered.
    async fn read_until(
        &mut self,
        terminator: &Terminator,
        deadline: Option<Duration>,
    ) -> Result<String, ProtocolError>;

    /// Close the channel
    async fn close(&mut self) -> Result<(), ProtocolError>;

    /// Drop input received but not yet consumed by a read
    fn discard_input(&mut self) {}

    /// Whether the channel has been closed, locally or by the device going away
    fn is_closed(&self) -> bool;
}

/// [`Transport`] over any async byte stream (serial port, in-memory pipe)
pub struct StreamTransport<S> {
    stream: S,
    buffer: ReadBuffer,
    closed: bool,
    label: String,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an open stream
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream,
            buffer: ReadBuffer::new(),
            closed: false,
            label: label.into(),
        }
    }

    /// Name used in log output (usually the port name)
    pub fn label(&self) -> &str {
        &self.label
    }

    fn note_error(&mut self, err: ProtocolError) -> ProtocolError {
        if err.is_disconnect() {
            debug!("{}: channel lost: {}", self.label, err);
            self.closed = true;
        }
        err
    }

    async fn fill_until(&mut self, terminator: &Terminator) -> Result<String, ProtocolError> {
        let mut chunk = [0u8; 512];
        loop {
            if let Some(text) = self.buffer.take_through(terminator) {
                debug!("{}: read {} bytes: {:?}", self.label, text.len(), text);
                return Ok(text);
            }
            match self.stream.read(&mut chunk).await {
                Ok(0) => {
                    debug!("{}: read returned 0 (EOF)", self.label);
                    self.closed = true;
                    return Err(ProtocolError::Closed);
                }
                Ok(n) => self.buffer.push(&chunk[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(self.note_error(e.into())),
            }
        }
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_str(&mut self, data: &str) -> Result<(), ProtocolError> {
        if self.closed {
            return Err(ProtocolError::Closed);
        }
        debug!("{}: writing {} bytes: {:?}", self.label, data.len(), data);
        if let Err(e) = self.stream.write_all(data.as_bytes()).await {
            return Err(self.note_error(e.into()));
        }
        if let Err(e) = self.stream.flush().await {
            return Err(self.note_error(e.into()));
        }
        Ok(())
    }

    async fn read_until(
        &mut self,
        terminator: &Terminator,
        deadline: Option<Duration>,
    ) -> Result<String, ProtocolError> {
        if self.closed {
            return Err(ProtocolError::Closed);
        }
        match deadline {
            Some(limit) => match tokio::time::timeout(limit, self.fill_until(terminator)).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(
                        "{}: no match for {:?} within {}ms ({} bytes pending)",
                        self.label,
                        terminator.regex_source(),
                        limit.as_millis(),
                        self.buffer.as_str().len()
                    );
                    Err(ProtocolError::Timeout)
                }
            },
            None => self.fill_until(terminator).await,
        }
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer.clear();
        self.stream.shutdown().await?;
        Ok(())
    }

    fn discard_input(&mut self) {
        if !self.buffer.is_empty() {
            debug!(
                "{}: discarding stale input {:?}",
                self.label,
                self.buffer.as_str()
            );
            self.buffer.clear();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
