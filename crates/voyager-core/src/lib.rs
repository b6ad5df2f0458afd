//! Voyager-Core: host side of the Voyager bootloader DFU protocol.
//!
//! Builds the START and DATA packets a host sends to a device running the
//! Voyager bootloader, and validates the 8-byte ACK the bootloader answers
//! each of them with.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, CRC engine, packet codec, ACK validation
//! - **Payload**: Application image loading and chunking
//! - **Transport**: Packet exchange abstraction (nusb, mock, simulated bootloader)
//! - **State**: Transfer state machine
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use voyager_core::session::{DfuSession, SessionConfig};
//!
//! let config = SessionConfig {
//!     image_path: Some("app.bin".to_string()),
//!     ..Default::default()
//! };
//!
//! let mut session = DfuSession::new(config);
//! session.run().expect("DFU failed");
//! ```

pub mod events;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use events::{DfuEvent, DfuObserver, DfuPhase, NullObserver, TracingObserver};
pub use payload::FirmwareImage;
pub use protocol::{CrcEngine, HostOutcome, PacketCodec, validate_ack};
pub use session::{DfuSession, SessionConfig, TransferError, TransferReport};
pub use state::{TransferMachine, TransferState};
pub use transport::{DfuTransport, MockTransport, NusbTransport, SimulatedBootloader, TransportError};
