//! Transport contract between the engine and a device endpoint.
//!
//! Implementations are expected to be blocking: every call returns only once
//! the transfer completed, timed out, or the device went away. The engine
//! never issues two calls on the same transport concurrently.

use loopcheck_core::TransferKind;

/// Failure of a single write or read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The device did not complete the transfer within the timeout.
    #[error("transfer timed out")]
    Timeout,
    /// The device is no longer reachable.
    #[error("device disconnected")]
    Disconnected,
    /// Anything else the host stack reported (stall, overflow, I/O error).
    #[error("transfer failed: {0}")]
    Io(String),
}

impl TransportError {
    /// Timeouts are the only transport failure worth retrying in place.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// A write/read capable endpoint pair (or control pipe) under test.
pub trait ChunkTransport: Send {
    /// Largest chunk this transport moves in one call
    /// (burst × wMaxPacketSize for streaming endpoints).
    fn max_packet_size(&self) -> usize;

    /// Submit `data`. Returns how many bytes the device accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `expected_length` bytes.
    fn read(&mut self, expected_length: usize) -> Result<Vec<u8>, TransportError>;
}

impl<T: ChunkTransport + ?Sized> ChunkTransport for Box<T> {
    fn max_packet_size(&self) -> usize {
        (**self).max_packet_size()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).write(data)
    }

    fn read(&mut self, expected_length: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read(expected_length)
    }
}

/// Result of one chunk attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub bytes_transferred: usize,
}

/// An IN/OUT endpoint pair found on the device's interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPairing {
    pub in_address: u8,
    pub out_address: u8,
    pub kind: TransferKind,
    /// Effective max packet size, burst factor already applied.
    pub max_packet_size: usize,
}

impl EndpointPairing {
    /// Endpoint number reported in failure summaries.
    pub fn endpoint_number(&self) -> u8 {
        loopcheck_core::protocol::endpoint_number(self.in_address)
    }
}
