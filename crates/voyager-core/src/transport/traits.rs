//! Transport layer abstraction.
//!
//! Defines the `DfuTransport` trait for moving whole packets between host
//! and bootloader, allowing different implementations (nusb, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Packet transport towards the bootloader.
///
/// The protocol is half-duplex: exactly one packet is outstanding, so a
/// `send` is always followed by a `receive` before the next `send`.
pub trait DfuTransport: Send + Sync {
    /// Send one complete packet.
    fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Block until one complete reply packet is available.
    fn receive(&self) -> Result<Vec<u8>, TransportError>;

    /// Send a packet and wait for its reply.
    fn exchange(&self, packet: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.send(packet)?;
        self.receive()
    }

    /// Check if the device is still reachable.
    fn is_connected(&self) -> bool {
        true
    }
}

impl<T: DfuTransport + ?Sized> DfuTransport for &T {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        (**self).send(data)
    }

    fn receive(&self) -> Result<Vec<u8>, TransportError> {
        (**self).receive()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
