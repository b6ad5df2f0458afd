//! Outbound packet construction.
//!
//! START and DATA packets are the only messages the host ever sends. The
//! DATA sequence counter belongs to a [`PacketCodec`], so every transfer
//! gets its own counter.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;
use tracing::{trace, warn};

use super::constants::{DATA_HEADER_SIZE, MAX_APP_SIZE, START_PACKET_SIZE};
use super::message::MessageId;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("Application size {size} (0x{size:X}) does not fit in 24 bits")]
    AppSizeTooLarge { size: u64 },
}

/// Builder for host-to-device packets with per-transfer sequencing.
#[derive(Debug, Default)]
pub struct PacketCodec {
    sequence: u8,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next DATA packet will carry (unless reset).
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Restart the DATA sequence at zero.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    /// Build a START packet.
    ///
    /// Only the low 24 bits of `app_size` go on the wire; higher bits are
    /// dropped. Use [`PacketCodec::try_build_start`] to reject such sizes.
    pub fn build_start(app_size: u64, app_crc: u32) -> [u8; START_PACKET_SIZE] {
        if app_size > MAX_APP_SIZE as u64 {
            warn!(
                app_size = %format!("0x{:X}", app_size),
                "Application size truncated to 24 bits"
            );
        }

        let mut buf = [0u8; START_PACKET_SIZE];
        buf[0] = MessageId::Start.as_u8();
        BigEndian::write_u24(&mut buf[1..4], (app_size & MAX_APP_SIZE as u64) as u32);
        BigEndian::write_u32(&mut buf[4..], app_crc);
        buf
    }

    /// Build a START packet, refusing sizes that need more than 24 bits.
    pub fn try_build_start(
        app_size: u64,
        app_crc: u32,
    ) -> Result<[u8; START_PACKET_SIZE], PacketError> {
        if app_size > MAX_APP_SIZE as u64 {
            return Err(PacketError::AppSizeTooLarge { size: app_size });
        }
        Ok(Self::build_start(app_size, app_crc))
    }

    /// Build a DATA packet and advance the sequence counter.
    ///
    /// With `reset_sequence` the packet carries sequence 0 regardless of the
    /// counter. Either way the counter afterwards is the written value + 1
    /// (mod 256).
    pub fn build_data(&mut self, payload: &[u8], reset_sequence: bool) -> Vec<u8> {
        if reset_sequence {
            self.sequence = 0;
        }

        let mut buf = Vec::with_capacity(DATA_HEADER_SIZE + payload.len());
        buf.push(MessageId::Data.as_u8());
        buf.push(self.sequence);
        buf.extend_from_slice(payload);

        trace!(seq = self.sequence, len = payload.len(), "Built DATA packet");
        self.sequence = self.sequence.wrapping_add(1);
        buf
    }
}
