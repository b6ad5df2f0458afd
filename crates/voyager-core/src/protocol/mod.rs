//! Protocol module - Voyager DFU wire format.

pub mod ack;
pub mod constants;
pub mod crc;
pub mod message;
pub mod packet;

pub use ack::{AckError, AckPacket, checksum_without_id, validate_ack};
pub use constants::*;
pub use crc::CrcEngine;
pub use message::{DeviceError, HostOutcome, MessageId};
pub use packet::{PacketCodec, PacketError};
