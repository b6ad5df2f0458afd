//! Event system for UI decoupling.
//!
//! Allows CLI/GUI front-ends to follow a transfer without tight coupling
//! to the core logic.

use std::fmt;

use crate::protocol::HostOutcome;
use crate::state::TransferState;

/// Session phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuPhase {
    /// Waiting for device connection.
    WaitingForDevice,
    /// START sent, waiting for the bootloader to accept the transfer.
    Start,
    /// DATA packets are being streamed.
    Transfer,
    /// All chunks acknowledged.
    Complete,
    /// Transfer stopped on a non-NONE outcome or transport failure.
    Error,
}

impl fmt::Display for DfuPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DfuPhase::WaitingForDevice => write!(f, "Waiting for Device"),
            DfuPhase::Start => write!(f, "Start"),
            DfuPhase::Transfer => write!(f, "Transfer"),
            DfuPhase::Complete => write!(f, "Complete"),
            DfuPhase::Error => write!(f, "Error"),
        }
    }
}

/// Packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by a DFU session.
#[derive(Debug, Clone)]
pub enum DfuEvent {
    /// Phase changed.
    PhaseChanged { from: DfuPhase, to: DfuPhase },
    /// Transfer state machine moved.
    StateChanged { state: TransferState },
    /// Bytes acknowledged so far.
    Progress { current: u64, total: u64 },
    /// Packet sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// ACK validated.
    AckReceived { outcome: HostOutcome },
    /// Transfer stopped.
    Error { outcome: Option<HostOutcome>, message: String },
    /// Image fully transferred.
    Complete,
}

/// Observer trait for receiving DFU events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DfuObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DfuEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DfuObserver for NullObserver {
    fn on_event(&self, _event: &DfuEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DfuObserver for TracingObserver {
    fn on_event(&self, event: &DfuEvent) {
        match event {
            DfuEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            DfuEvent::StateChanged { state } => {
                tracing::debug!(state = %state, "Transfer state");
            }
            DfuEvent::Progress { current, total } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    100
                };
                tracing::debug!(progress = %format!("{}%", pct), current, total, "Progress");
            }
            DfuEvent::Packet {
                direction, length, ..
            } => {
                tracing::trace!(dir = %direction, len = length, "Packet");
            }
            DfuEvent::AckReceived { outcome } => {
                tracing::debug!(outcome = %outcome, "ACK received");
            }
            DfuEvent::Error { outcome, message } => match outcome {
                Some(outcome) => tracing::error!(outcome = %outcome, "Error: {}", message),
                None => tracing::error!("Error: {}", message),
            },
            DfuEvent::Complete => {
                tracing::info!("Transfer complete");
            }
        }
    }
}
