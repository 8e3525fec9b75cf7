//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;
use std::time::Duration;

use crate::error::{IngestError, Result};

/// Trait for serial port I/O operations
#[async_trait]
pub trait SerialPortIO: Send {
    /// Read available bytes into `buf`, returning how many were read.
    /// `Ok(0)` means the peer closed the stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens serial devices; the seam where tests substitute a mock port
#[cfg_attr(test, mockall::automock)]
pub trait PortOpener: Send + Sync {
    fn open(&self, path: &str, baud_rate: u32, timeout: Duration) -> Result<Box<dyn SerialPortIO>>;
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.port.read(buf).await
    }
}

/// Opens real devices with `tokio-serial` (8N1, no flow control)
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialOpener;

impl PortOpener for TokioSerialOpener {
    fn open(&self, path: &str, baud_rate: u32, timeout: Duration) -> Result<Box<dyn SerialPortIO>> {
        use tokio_serial::SerialPortBuilderExt;

        if !std::path::Path::new(path).exists() {
            return Err(IngestError::LinkUnavailable(format!("{} does not exist", path)));
        }

        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| IngestError::LinkUnavailable(format!("Failed to open {}: {}", path, e)))?;

        Ok(Box::new(TokioSerialPort::new(port)))
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::*;
    use super::*;

    #[tokio::test]
    async fn test_real_opener_rejects_missing_device() {
        let result = TokioSerialOpener.open(
            "/dev/nonexistent_serial_device_12345",
            9600,
            Duration::from_secs(1),
        );

        match result {
            Err(IngestError::LinkUnavailable(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
            }
            Err(other) => panic!("Expected LinkUnavailable, got: {:?}", other),
            Ok(_) => panic!("Expected LinkUnavailable, got an open port"),
        }
    }

    #[tokio::test]
    async fn test_mock_port_splits_large_chunks() {
        let mut port = MockSerialPort::new([ReadStep::Data(b"abcdef".to_vec())]);
        let mut buf = [0u8; 4];

        assert_eq!(port.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(port.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[tokio::test]
    async fn test_mock_port_idles_after_script() {
        let mut port = MockSerialPort::new([ReadStep::Eof]);
        let mut buf = [0u8; 8];

        assert_eq!(port.read(&mut buf).await.unwrap(), 0);
        let err = port.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(port.read_count(), 2);
    }
}
