//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod simulator;
pub mod traits;

pub use mock::MockTransport;
pub use nusb::NusbTransport;
pub use simulator::SimulatedBootloader;
pub use traits::{DfuTransport, TransportError};
