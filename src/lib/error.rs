use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

use crate::port::OpenPortError;

pub type Result<T> = std::result::Result<T, DeviceError>;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("data format error: {0}")]
    DataFormat(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation not supported by this device")]
    Unsupported,
}

/// The bytes arrived, but they are not what the device should have sent.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected answer header")]
    BadHeader,
    #[error("unexpected answer size")]
    BadLength,
    #[error("unexpected answer parameters")]
    BadParameters,
    #[error("unexpected answer checksum")]
    BadChecksum,
}

impl DeviceError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        DeviceError::InvalidArgument(msg.into())
    }

    /// Timeouts and transport failures may succeed on a second attempt; everything
    /// else means the device state is not what we expect.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeviceError::Timeout | DeviceError::Io(_))
    }
}

impl From<serialport::Error> for DeviceError {
    fn from(err: serialport::Error) -> Self {
        DeviceError::Io(err.into())
    }
}

impl From<TryReserveError> for DeviceError {
    fn from(_: TryReserveError) -> Self {
        DeviceError::OutOfMemory
    }
}

impl From<OpenPortError> for DeviceError {
    fn from(err: OpenPortError) -> Self {
        let kind = match err {
            OpenPortError::NoCompatiblePort => io::ErrorKind::NotFound,
            OpenPortError::PortBusy { .. } => io::ErrorKind::AddrInUse,
        };
        DeviceError::Io(io::Error::new(kind, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(DeviceError::Timeout.is_retryable());
        assert!(DeviceError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_retryable());
        assert!(!DeviceError::Protocol(ProtocolError::BadChecksum).is_retryable());
        assert!(!DeviceError::DataFormat("x".into()).is_retryable());
        assert!(!DeviceError::Cancelled.is_retryable());
    }

    #[test]
    fn open_port_errors_are_io() {
        let err: DeviceError = OpenPortError::NoCompatiblePort.into();
        match err {
            DeviceError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected {:?}", other),
        }
    }
}
