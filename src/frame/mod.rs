//! # Frame Reader Module
//!
//! Turns the byte stream of an open serial link into text frames, one per
//! newline-terminated line.
//!
//! This module handles:
//! - Buffering partial lines across reads
//! - Lossy UTF-8 decoding (malformed bytes never abort a frame)
//! - Dropping blank lines and oversized lines
//! - Mapping read faults to `LinkLost`

pub mod source;

use bytes::{Buf, BytesMut};
use chrono::{DateTime, Utc};
use std::io;
use std::time::Duration;
use tracing::{trace, warn};

use crate::error::{IngestError, Result};
use crate::record::{NewFrameRecord, SensorReadings, UNKNOWN_SENDER};
use crate::serial::SerialLink;

pub use source::{FrameSource, SerialFrameSource};

/// Bytes requested from the link per read
const READ_CHUNK_SIZE: usize = 256;

/// A frame produced by a frame source
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Sender identity, when the transport knows it
    pub device_id: Option<String>,
    /// Raw frame text
    pub payload: Option<String>,
    /// Structured readings, when the source parses them
    pub readings: SensorReadings,
}

impl Frame {
    /// A raw text frame from an unidentified sender
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            device_id: None,
            payload: Some(text.into()),
            readings: SensorReadings::default(),
        }
    }

    /// Build the record to persist, stamped with `timestamp`
    pub fn into_record(self, timestamp: DateTime<Utc>) -> NewFrameRecord {
        let device_id = self
            .device_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string());

        NewFrameRecord {
            device_id,
            timestamp,
            readings: self.readings,
            payload: self.payload,
        }
    }
}

/// Decode one line (without its terminator) into frame text
///
/// Returns `None` for lines that are blank after trimming.
pub fn decode_line(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Splits a link's byte stream into frames
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    max_frame_len: usize,
    read_timeout: Duration,
    /// Set after an oversized partial line was dropped; bytes are skipped
    /// until the next newline
    discarding: bool,
}

impl FrameReader {
    pub fn new(max_frame_len: usize, read_timeout: Duration) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_frame_len.min(READ_CHUNK_SIZE * 4)),
            max_frame_len,
            read_timeout,
            discarding: false,
        }
    }

    /// Forget any buffered bytes (the link they came from is gone)
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Bytes buffered but not yet terminated by a newline
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Poll the next frame from `link`
    ///
    /// Returns `Ok(None)` when no complete line arrived within the read
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns `LinkLost` when the link reports end of stream or an I/O
    /// fault; the buffer is reset.
    pub async fn next_frame(&mut self, link: &mut SerialLink) -> Result<Option<Frame>> {
        if let Some(frame) = self.take_buffered() {
            return Ok(Some(frame));
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let read = tokio::time::timeout(self.read_timeout, link.read(&mut chunk)).await;

        match read {
            Err(_elapsed) => Ok(None),
            Ok(Ok(0)) => {
                self.reset();
                Err(IngestError::LinkLost(format!(
                    "{}: end of stream",
                    link.device_path()
                )))
            }
            Ok(Ok(n)) => {
                trace!("Read {} bytes from {}", n, link.device_path());
                self.buffer.extend_from_slice(&chunk[..n]);
                Ok(self.take_buffered())
            }
            Ok(Err(e)) if is_idle(&e) => Ok(None),
            Ok(Err(e)) => {
                self.reset();
                Err(IngestError::LinkLost(format!(
                    "{}: {}",
                    link.device_path(),
                    e
                )))
            }
        }
    }

    /// Pop the next non-blank complete line from the buffer
    fn take_buffered(&mut self) -> Option<Frame> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);

            if self.discarding {
                self.discarding = false;
                continue;
            }

            // A CRLF terminator does not count toward the frame length
            let content = if pos > 0 && line[pos - 1] == b'\r' { pos - 1 } else { pos };
            if content > self.max_frame_len {
                warn!("Dropping {}-byte line (max frame length {})", content, self.max_frame_len);
                continue;
            }

            if let Some(text) = decode_line(&line[..content]) {
                return Some(Frame::raw(text));
            }
        }

        // One extra byte leaves room for the '\r' of a split CRLF
        if self.buffer.len() > self.max_frame_len + 1 {
            if !self.discarding {
                warn!(
                    "No newline within {} bytes, discarding until next line",
                    self.max_frame_len
                );
            }
            let len = self.buffer.len();
            self.buffer.advance(len);
            self.discarding = true;
        }

        None
    }
}

/// Read errors that only mean "nothing arrived yet"
fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
