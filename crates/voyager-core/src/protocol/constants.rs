//! Protocol constants shared with the Voyager bootloader.
//!
//! Values mirror the device firmware headers; changing any of them breaks
//! wire compatibility.

// ============================================================================
// Packet Sizes
// ============================================================================

/// START packet size (id + 24-bit size + 32-bit CRC).
pub const START_PACKET_SIZE: usize = 8;

/// ACK packet size (id + error + 32-bit CRC + 2 reserved bytes).
pub const ACK_PACKET_SIZE: usize = 8;

/// DATA packet header size (id + sequence number).
pub const DATA_HEADER_SIZE: usize = 2;

// ============================================================================
// Field Limits
// ============================================================================

/// Largest application size representable in a START packet.
pub const MAX_APP_SIZE: u32 = 0x00FF_FFFF;

/// Initial value of the checksum accumulator.
pub const CRC_INIT: u32 = 0xFFFF_FFFF;

// ============================================================================
// ACK Field Offsets
// ============================================================================

pub const ACK_ERROR_OFFSET: usize = 1;
pub const ACK_CRC_OFFSET: usize = 2;
pub const ACK_RESERVED_OFFSET: usize = 6;

// ============================================================================
// Host Defaults
// ============================================================================

/// Default DATA payload size used by the session.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Default seconds to wait for the device to enumerate.
pub const DEFAULT_DEVICE_WAIT_SECS: u64 = 60;

/// Default USB IDs (pid.codes test VID/PID).
pub const DEFAULT_VENDOR_ID: u16 = 0x1209;
pub const DEFAULT_PRODUCT_ID: u16 = 0x0001;

/// Maximum bytes requested from the transport for a single reply.
pub const MAX_REPLY_SIZE: usize = 64;

/// Buffer size of the USB bulk reader/writer.
pub const BULK_BUFFER_SIZE: usize = 512;

/// Per-packet send/receive timeout of the USB transport.
pub const TRANSFER_TIMEOUT_MS: u64 = 5000;
