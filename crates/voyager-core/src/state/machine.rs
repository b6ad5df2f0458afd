//! Transfer state machine.
//!
//! ```text
//! SendStart -> WaitStartAck -(NONE)-> SendData{0} -> WaitDataAck{0} -(NONE)-> ... -> Done
//!                   \                                     \
//!                    `--(other)--> Failed{outcome} <-------`
//! ```

use std::fmt;

use thiserror::Error;

use crate::protocol::HostOutcome;

/// Position of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// START has to be sent.
    SendStart,
    /// START is outstanding.
    WaitStartAck,
    /// DATA for `chunk` has to be sent.
    SendData { chunk: usize },
    /// DATA for `chunk` is outstanding.
    WaitDataAck { chunk: usize },
    /// Every chunk was acknowledged.
    Done,
    /// A reply other than NONE stopped the transfer.
    Failed { outcome: HostOutcome },
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Done | TransferState::Failed { .. })
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::SendStart => write!(f, "SEND_START"),
            TransferState::WaitStartAck => write!(f, "WAIT_ACK(START)"),
            TransferState::SendData { chunk } => write!(f, "SEND_DATA[{}]", chunk),
            TransferState::WaitDataAck { chunk } => write!(f, "WAIT_ACK(DATA[{}])", chunk),
            TransferState::Done => write!(f, "DONE"),
            TransferState::Failed { outcome } => write!(f, "FAILED({})", outcome),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("Cannot send a packet in state {0}")]
    NotSending(TransferState),
    #[error("No packet outstanding in state {0}")]
    NotWaiting(TransferState),
}

/// State machine for one START + DATA* exchange.
#[derive(Debug)]
pub struct TransferMachine {
    state: TransferState,
    total_chunks: usize,
    acknowledged: usize,
}

impl TransferMachine {
    pub fn new(total_chunks: usize) -> Self {
        Self {
            state: TransferState::SendStart,
            total_chunks,
            acknowledged: 0,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Number of DATA chunks acknowledged so far.
    pub fn chunks_acknowledged(&self) -> usize {
        self.acknowledged
    }

    /// The next DATA packet must restart the sequence counter.
    pub fn resets_sequence(&self) -> bool {
        matches!(self.state, TransferState::SendData { chunk: 0 })
    }

    /// Record that the packet for the current state went out.
    pub fn packet_sent(&mut self) -> Result<TransferState, StateError> {
        let next = match self.state {
            TransferState::SendStart => TransferState::WaitStartAck,
            TransferState::SendData { chunk } => TransferState::WaitDataAck { chunk },
            other => return Err(StateError::NotSending(other)),
        };
        self.goto_state(next);
        Ok(next)
    }

    /// Feed the outcome of the outstanding packet's ACK.
    pub fn ack_received(&mut self, outcome: HostOutcome) -> Result<TransferState, StateError> {
        let next_chunk = match self.state {
            TransferState::WaitStartAck => 0,
            TransferState::WaitDataAck { chunk } => chunk + 1,
            other => return Err(StateError::NotWaiting(other)),
        };

        let next = if !outcome.is_success() {
            TransferState::Failed { outcome }
        } else {
            self.acknowledged = next_chunk;
            if next_chunk < self.total_chunks {
                TransferState::SendData { chunk: next_chunk }
            } else {
                TransferState::Done
            }
        };
        self.goto_state(next);
        Ok(next)
    }

    fn goto_state(&mut self, new_state: TransferState) {
        tracing::debug!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }
}
