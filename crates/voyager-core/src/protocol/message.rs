//! Message identifiers and error vocabularies.
//!
//! The device and the host mirror these enumerations. Everything decoded
//! from a received byte goes through a total mapping: values outside the
//! known set become an explicit "unknown" variant instead of an error.

use std::fmt;

/// Leading byte of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageId {
    Unknown = 0,
    Start = 1,
    Ack = 2,
    Data = 3,
}

impl MessageId {
    /// Wire value.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<u8> for MessageId {
    fn from(value: u8) -> Self {
        match value {
            1 => MessageId::Start,
            2 => MessageId::Ack,
            3 => MessageId::Data,
            _ => MessageId::Unknown,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Unknown => write!(f, "UNKNOWN"),
            MessageId::Start => write!(f, "START"),
            MessageId::Ack => write!(f, "ACK"),
            MessageId::Data => write!(f, "DATA"),
        }
    }
}

/// Error code reported by the device inside an ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceError {
    None = 0,
    PacketOverrun = 1,
    EnterDfuNotRequested = 2,
    OutOfSequence = 3,
    InvalidMessageId = 4,
    SizeTooLarge = 5,
    InternalError = 6,
}

impl DeviceError {
    /// All codes the device can report, in wire order.
    pub const ALL: [DeviceError; 7] = [
        DeviceError::None,
        DeviceError::PacketOverrun,
        DeviceError::EnterDfuNotRequested,
        DeviceError::OutOfSequence,
        DeviceError::InvalidMessageId,
        DeviceError::SizeTooLarge,
        DeviceError::InternalError,
    ];

    /// Decode a wire byte. Returns `None` for codes the host does not know.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Wire value.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        HostOutcome::from(*self).fmt(f)
    }
}

/// Result of validating a device reply on the host.
///
/// Superset of [`DeviceError`]: the first seven variants share names and
/// numeric values with the device codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HostOutcome {
    None = 0,
    PacketOverrun = 1,
    EnterDfuNotRequested = 2,
    OutOfSequence = 3,
    InvalidMessageId = 4,
    SizeTooLarge = 5,
    InternalError = 6,
    CrcMismatch = 7,
    UnknownErrorCode = 8,
}

impl HostOutcome {
    /// Numeric value of the outcome.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// The packet was accepted and the transfer may advance.
    pub fn is_success(self) -> bool {
        self == HostOutcome::None
    }

    /// Resending the same packet is a reasonable reaction.
    ///
    /// Only a checksum mismatch qualifies: it points at corruption on the
    /// link rather than at a protocol violation.
    pub fn is_retryable(self) -> bool {
        self == HostOutcome::CrcMismatch
    }

    /// Protocol name of the outcome.
    pub fn name(self) -> &'static str {
        match self {
            HostOutcome::None => "NONE",
            HostOutcome::PacketOverrun => "PACKET_OVERRUN",
            HostOutcome::EnterDfuNotRequested => "ENTER_DFU_NOT_REQUESTED",
            HostOutcome::OutOfSequence => "OUT_OF_SEQUENCE",
            HostOutcome::InvalidMessageId => "INVALID_MESSAGE_ID",
            HostOutcome::SizeTooLarge => "SIZE_TOO_LARGE",
            HostOutcome::InternalError => "INTERNAL_ERROR",
            HostOutcome::CrcMismatch => "CRC_MISMATCH",
            HostOutcome::UnknownErrorCode => "UNKNOWN_ERROR_CODE",
        }
    }
}

impl From<DeviceError> for HostOutcome {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::None => HostOutcome::None,
            DeviceError::PacketOverrun => HostOutcome::PacketOverrun,
            DeviceError::EnterDfuNotRequested => HostOutcome::EnterDfuNotRequested,
            DeviceError::OutOfSequence => HostOutcome::OutOfSequence,
            DeviceError::InvalidMessageId => HostOutcome::InvalidMessageId,
            DeviceError::SizeTooLarge => HostOutcome::SizeTooLarge,
            DeviceError::InternalError => HostOutcome::InternalError,
        }
    }
}

impl fmt::Display for HostOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
