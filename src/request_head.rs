//! Bounded accumulation and parsing of HTTP-style request heads.
//!
//! Both the HTTP responder and the WebSocket handshake read a request head of unknown length
//! into a fixed buffer. [`HeadBuffer`] does the accumulation and terminator search;
//! [`RequestHead`] parses the request line and gives case-insensitive header lookup.

use heapless::Vec;
use memchr::memmem;

use crate::{Error, Result};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Progress of a [`HeadBuffer`] after more bytes arrive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeadStatus {
    /// No blank line yet and there is still room.
    Partial,
    /// The head is complete; the value is its length including the blank line.
    Complete(usize),
    /// The buffer filled up before the blank line arrived.
    Overflow,
}

/// A fixed-capacity accumulator for a request head.
///
/// Bytes past the terminator that still fit are kept (they may be the start of a body or of
/// the first WebSocket frame) but never cause an overflow.
#[derive(Debug)]
pub struct HeadBuffer<const N: usize> {
    bytes: Vec<u8, N>,
    scanned: usize,
    head_len: Option<usize>,
}

impl<const N: usize> HeadBuffer<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            scanned: 0,
            head_len: None,
        }
    }

    /// Append bytes read from the peer and report whether the head is complete.
    pub fn push(&mut self, data: &[u8]) -> HeadStatus {
        let room = N.saturating_sub(self.bytes.len());
        let taken = data.len().min(room);
        if let Some(fitting) = data.get(..taken) {
            // Cannot fail: `taken` never exceeds the remaining capacity.
            let _ = self.bytes.extend_from_slice(fitting);
        }

        if self.head_len.is_none() {
            self.head_len = self.scan();
        }

        match self.head_len {
            Some(head_len) => HeadStatus::Complete(head_len),
            None if taken < data.len() || self.bytes.is_full() => HeadStatus::Overflow,
            None => HeadStatus::Partial,
        }
    }

    /// Search only the bytes not yet scanned, backing up far enough to catch a terminator
    /// split across two reads.
    fn scan(&mut self) -> Option<usize> {
        let start = self
            .scanned
            .saturating_sub(HEAD_TERMINATOR.len().saturating_sub(1));
        self.scanned = self.bytes.len();
        let haystack = self.bytes.get(start..)?;
        memmem::find(haystack, HEAD_TERMINATOR).map(|pos| start + pos + HEAD_TERMINATOR.len())
    }

    /// The complete head, once the blank line has been seen.
    #[must_use]
    pub fn head(&self) -> Option<&[u8]> {
        self.head_len.and_then(|len| self.bytes.get(..len))
    }

    /// Bytes received after the head.
    #[must_use]
    pub fn trailing(&self) -> &[u8] {
        self.head_len
            .and_then(|len| self.bytes.get(len..))
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl<const N: usize> Default for HeadBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The request line and header block of an HTTP-style request.
#[derive(Clone, Copy, Debug)]
pub struct RequestHead<'a> {
    method: &'a str,
    path: &'a str,
    header_block: &'a str,
}

impl<'a> RequestHead<'a> {
    /// Parse a request head. Only the request line is required; the header block may be
    /// missing or cut short (a head read until a timeout).
    ///
    /// # Errors
    /// Returns [`Error::MalformedRequest`] if the request line has no method or path, or the
    /// bytes are not UTF-8.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let text = utf8_prefix(bytes)?;
        let (request_line, header_block) = text.split_once("\r\n").unwrap_or((text, ""));

        let mut parts = request_line.split_ascii_whitespace();
        let method = parts.next().ok_or(Error::MalformedRequest)?;
        let path = parts.next().ok_or(Error::MalformedRequest)?;

        Ok(Self {
            method,
            path,
            header_block,
        })
    }

    #[must_use]
    pub const fn method(&self) -> &'a str {
        self.method
    }

    #[must_use]
    pub const fn path(&self) -> &'a str {
        self.path
    }

    /// Iterate `(name, value)` pairs in order of appearance, both trimmed.
    pub fn headers(&self) -> impl Iterator<Item = (&'a str, &'a str)> + use<'a> {
        let block = self.header_block;
        block
            .split("\r\n")
            .take_while(|line| !line.is_empty())
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim(), value.trim()))
            })
    }

    /// Look up a header by name, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }
}

// A head cut short by a timeout may end inside a multi-byte character; keep what is valid.
fn utf8_prefix(bytes: &[u8]) -> Result<&str> {
    match core::str::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) if err.error_len().is_none() => bytes
            .get(..err.valid_up_to())
            .and_then(|valid| core::str::from_utf8(valid).ok())
            .ok_or(Error::MalformedRequest),
        Err(_) => Err(Error::MalformedRequest),
    }
}
