//! Frame sources: the capability the ingestion loop consumes.
//!
//! Raw serial lines are the only transport implemented here. A structured
//! radio receiver would implement [`FrameSource`] as well, filling in
//! `device_id` and the sensor readings of each [`Frame`].

use async_trait::async_trait;

use super::{Frame, FrameReader};
use crate::config::SerialConfig;
use crate::error::{IngestError, Result};
use crate::serial::LinkManager;

/// A connectable, lazily polled stream of frames
#[async_trait]
pub trait FrameSource: Send {
    /// Establish (or keep) the underlying connection
    async fn connect(&mut self) -> Result<()>;

    /// Next frame, `None` if nothing arrived yet, `LinkLost` if the
    /// connection dropped
    async fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying connection
    fn disconnect(&mut self);

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Newline-delimited frames from a serial device
#[derive(Debug)]
pub struct SerialFrameSource {
    manager: LinkManager,
    reader: FrameReader,
}

impl SerialFrameSource {
    pub fn new(manager: LinkManager, reader: FrameReader) -> Self {
        Self { manager, reader }
    }

    /// Build a source for the configured device
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMissing` if no serial port is configured
    pub fn from_config(config: &SerialConfig) -> Result<Self> {
        let manager = LinkManager::new(config)?;
        let reader = FrameReader::new(config.max_frame_len, config.read_timeout());
        Ok(Self::new(manager, reader))
    }

    pub fn manager(&self) -> &LinkManager {
        &self.manager
    }
}

#[async_trait]
impl FrameSource for SerialFrameSource {
    async fn connect(&mut self) -> Result<()> {
        self.manager.open()?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        let link = self
            .manager
            .link_mut()
            .ok_or_else(|| IngestError::LinkLost("serial port is not open".to_string()))?;

        let polled = self.reader.next_frame(link).await;
        if let Err(e) = &polled {
            self.manager.invalidate(e);
            self.reader.reset();
        }
        polled
    }

    fn disconnect(&mut self) {
        self.manager.close();
        self.reader.reset();
    }

    fn describe(&self) -> String {
        format!("serial {}", self.manager.device_path())
    }
}
