//! ACK decoding and validation.
//!
//! Every START/DATA packet is answered by an 8-byte ACK that echoes the
//! checksum of the packet it acknowledges (minus the id byte). The host
//! never trusts the reply: framing, error code and checksum are all checked
//! and folded into a [`HostOutcome`].

use std::fmt;
use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use thiserror::Error;
use tracing::{debug, warn};

use super::constants::{
    ACK_CRC_OFFSET, ACK_ERROR_OFFSET, ACK_PACKET_SIZE, ACK_RESERVED_OFFSET,
};
use super::crc::CrcEngine;
use super::message::{DeviceError, HostOutcome, MessageId};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckError {
    #[error("ACK has wrong length: expected {expected}, got {actual}")]
    BadLength { expected: usize, actual: usize },
    #[error("Not an ACK: message id {id}")]
    NotAnAck { id: MessageId },
    #[error("Unknown device error code 0x{0:02X}")]
    UnknownErrorCode(u8),
}

impl From<AckError> for HostOutcome {
    fn from(err: AckError) -> Self {
        match err {
            AckError::BadLength { .. } => HostOutcome::SizeTooLarge,
            AckError::NotAnAck { .. } => HostOutcome::InvalidMessageId,
            AckError::UnknownErrorCode(_) => HostOutcome::UnknownErrorCode,
        }
    }
}

/// Decoded ACK packet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AckPacket {
    pub error: DeviceError,
    /// Checksum of the acknowledged packet without its id byte.
    pub crc: u32,
}

impl AckPacket {
    pub const SIZE: usize = ACK_PACKET_SIZE;

    pub fn new(error: DeviceError, crc: u32) -> Self {
        Self { error, crc }
    }

    /// Successful ACK for `packet`, as the bootloader would generate it.
    pub fn acknowledging(packet: &[u8]) -> Self {
        Self::new(DeviceError::None, checksum_without_id(packet))
    }

    /// Error ACK. The device zeroes the checksum field in this case.
    pub fn rejecting(error: DeviceError) -> Self {
        Self::new(error, 0)
    }

    /// Decode an ACK. Reserved bytes are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, AckError> {
        if data.len() != Self::SIZE {
            return Err(AckError::BadLength {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }

        let id = MessageId::from(data[0]);
        if id != MessageId::Ack {
            return Err(AckError::NotAnAck { id });
        }

        let code = data[ACK_ERROR_OFFSET];
        let error = DeviceError::from_code(code).ok_or(AckError::UnknownErrorCode(code))?;

        let mut cursor = Cursor::new(&data[ACK_CRC_OFFSET..]);
        let crc = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| AckError::BadLength {
                expected: Self::SIZE,
                actual: data.len(),
            })?;

        Ok(Self { error, crc })
    }

    pub fn to_bytes(&self) -> [u8; ACK_PACKET_SIZE] {
        let mut buf = [0u8; ACK_PACKET_SIZE];
        buf[0] = MessageId::Ack.as_u8();
        buf[ACK_ERROR_OFFSET] = self.error.code();
        BigEndian::write_u32(&mut buf[ACK_CRC_OFFSET..ACK_RESERVED_OFFSET], self.crc);
        buf
    }
}

impl fmt::Debug for AckPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AckPacket({}, crc=0x{:08X})", self.error, self.crc)
    }
}

/// Checksum the device computes over a packet: everything after the id byte.
pub fn checksum_without_id(packet: &[u8]) -> u32 {
    CrcEngine::compute(packet.get(1..).unwrap_or(&[]))
}

/// Validate a device reply against the packet it answers.
///
/// The checksum is only inspected when the device reports no error.
pub fn validate_ack(ack: &[u8], previous_sent: &[u8]) -> HostOutcome {
    let packet = match AckPacket::from_bytes(ack) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, ack = ?ack, "Malformed ACK");
            return e.into();
        }
    };

    if packet.error != DeviceError::None {
        debug!(error = %packet.error, "Device reported error");
        return packet.error.into();
    }

    let computed = checksum_without_id(previous_sent);
    if computed != packet.crc {
        warn!(
            computed = %format!("0x{:08X}", computed),
            received = %format!("0x{:08X}", packet.crc),
            previous = ?previous_sent,
            ack = ?ack,
            "CRC mismatch"
        );
        return HostOutcome::CrcMismatch;
    }

    HostOutcome::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::PacketCodec;

    fn ack_bytes(code: u8, crc: u32) -> Vec<u8> {
        let mut v = vec![MessageId::Ack.as_u8(), code];
        v.extend_from_slice(&crc.to_be_bytes());
        v.extend_from_slice(&[0, 0]);
        v
    }

    #[test]
    fn test_wrong_length_is_size_too_large() {
        let prev = PacketCodec::build_start(16, 0);
        for len in [0usize, 1, 7, 9, 64] {
            let ack = vec![MessageId::Ack.as_u8(); len];
            assert_eq!(validate_ack(&ack, &prev), HostOutcome::SizeTooLarge);
        }
    }

    #[test]
    fn test_wrong_id_is_invalid_message_id() {
        let prev = PacketCodec::build_start(16, 0);
        let mut ack = ack_bytes(0, checksum_without_id(&prev));
        for id in [0u8, 1, 3, 0xFF] {
            ack[0] = id;
            assert_eq!(validate_ack(&ack, &prev), HostOutcome::InvalidMessageId);
        }
    }

    #[test]
    fn test_unknown_error_code() {
        let prev = PacketCodec::build_start(16, 0);
        for code in [7u8, 8, 0x80, 0xFF] {
            let ack = ack_bytes(code, 0);
            assert_eq!(validate_ack(&ack, &prev), HostOutcome::UnknownErrorCode);
        }
    }

    #[test]
    fn test_valid_ack_for_start() {
        let prev = PacketCodec::build_start(0x0102_0304, 0xDEAD_BEEF);
        let ack = ack_bytes(0, 0x54F8_4A0C);
        assert_eq!(validate_ack(&ack, &prev), HostOutcome::None);
    }

    #[test]
    fn test_valid_ack_for_data() {
        let mut codec = PacketCodec::new();
        let prev = codec.build_data(&[0x01, 0x02, 0x03], true);
        let ack = AckPacket::acknowledging(&prev).to_bytes();
        assert_eq!(ack[2..6], 0x6B6D_C92Au32.to_be_bytes());
        assert_eq!(validate_ack(&ack, &prev), HostOutcome::None);
    }

    #[test]
    fn test_crc_mismatch() {
        let prev = PacketCodec::build_start(100, 0x1234_5678);
        let good = checksum_without_id(&prev);
        let ack = ack_bytes(0, good ^ 0x0000_0100);
        assert_eq!(validate_ack(&ack, &prev), HostOutcome::CrcMismatch);
    }

    #[test]
    fn test_crc_covers_id_less_packet() {
        // A checksum over the full packet (id included) must not validate.
        let prev = PacketCodec::build_start(100, 0x1234_5678);
        let ack = ack_bytes(0, CrcEngine::compute(&prev));
        assert_eq!(validate_ack(&ack, &prev), HostOutcome::CrcMismatch);
    }

    #[test]
    fn test_device_error_skips_crc_check() {
        let prev = PacketCodec::build_start(100, 0x1234_5678);
        let garbage = ack_bytes(DeviceError::EnterDfuNotRequested.code(), 0xBAAD_F00D);
        assert_eq!(
            validate_ack(&garbage, &prev),
            HostOutcome::EnterDfuNotRequested
        );

        let correct = ack_bytes(
            DeviceError::EnterDfuNotRequested.code(),
            checksum_without_id(&prev),
        );
        assert_eq!(
            validate_ack(&correct, &prev),
            HostOutcome::EnterDfuNotRequested
        );
    }

    #[test]
    fn test_every_device_error_maps_through() {
        let prev = [MessageId::Data.as_u8(), 0];
        for err in DeviceError::ALL.into_iter().skip(1) {
            let ack = AckPacket::rejecting(err).to_bytes();
            assert_eq!(validate_ack(&ack, &prev), HostOutcome::from(err));
        }
    }

    #[test]
    fn test_reserved_bytes_ignored() {
        let prev = PacketCodec::build_start(1, 1);
        let mut ack = AckPacket::acknowledging(&prev).to_bytes();
        ack[6] = 0xAB;
        ack[7] = 0xCD;
        assert_eq!(validate_ack(&ack, &prev), HostOutcome::None);
    }

    #[test]
    fn test_empty_previous_packet() {
        let ack = ack_bytes(0, 0xFFFF_FFFF);
        assert_eq!(validate_ack(&ack, &[]), HostOutcome::None);
        assert_eq!(validate_ack(&ack, &[MessageId::Start.as_u8()]), HostOutcome::None);
    }

    #[test]
    fn test_ack_packet_decode() {
        let ack = AckPacket::from_bytes(&ack_bytes(3, 0x0102_0304)).unwrap();
        assert_eq!(ack.error, DeviceError::OutOfSequence);
        assert_eq!(ack.crc, 0x0102_0304);

        let encoded = AckPacket::new(DeviceError::InternalError, 0xCAFE_BABE).to_bytes();
        assert_eq!(encoded, [0x02, 0x06, 0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00]);
        assert_eq!(&encoded[ACK_RESERVED_OFFSET..], &[0, 0]);
    }

    #[test]
    fn test_ack_error_to_outcome() {
        assert_eq!(
            HostOutcome::from(AckError::BadLength {
                expected: 8,
                actual: 3
            }),
            HostOutcome::SizeTooLarge
        );
        assert_eq!(
            HostOutcome::from(AckError::NotAnAck {
                id: MessageId::Data
            }),
            HostOutcome::InvalidMessageId
        );
        assert_eq!(
            HostOutcome::from(AckError::UnknownErrorCode(9)),
            HostOutcome::UnknownErrorCode
        );
    }
}
