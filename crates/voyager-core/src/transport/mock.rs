//! Mock transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::simulator::SimulatedBootloader;
use super::traits::{DfuTransport, TransportError};
use crate::protocol::constants::TRANSFER_TIMEOUT_MS;
use crate::protocol::{AckPacket, DeviceError};

/// Mock transport for unit testing session and state machine logic.
///
/// Replies come from the reply queue first; when the queue is empty and a
/// simulated bootloader is attached, the simulator answers the last sent
/// packet.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued replies to return on receive.
    reply_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured sends.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Optional device model.
    bootloader: Option<Arc<Mutex<SimulatedBootloader>>>,
    /// Replies produced by the simulator but not yet received.
    pending: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread must not hide the state from the others.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            reply_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            bootloader: None,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Mock backed by a simulated bootloader.
    pub fn with_bootloader(bootloader: SimulatedBootloader) -> Self {
        Self {
            bootloader: Some(Arc::new(Mutex::new(bootloader))),
            ..Self::new()
        }
    }

    /// Queue a raw reply to be returned on next receive.
    pub fn queue_reply(&self, reply: &[u8]) {
        lock(&self.reply_queue).push_back(reply.to_vec());
    }

    /// Queue a well-formed ACK.
    pub fn queue_ack(&self, ack: AckPacket) {
        self.queue_reply(&ack.to_bytes());
    }

    /// Queue an ACK acknowledging `packet`.
    pub fn queue_ack_for(&self, packet: &[u8]) {
        self.queue_ack(AckPacket::acknowledging(packet));
    }

    /// Queue an error ACK.
    pub fn queue_error(&self, error: DeviceError) {
        self.queue_ack(AckPacket::rejecting(error));
    }

    /// Run `f` against the attached simulator.
    ///
    /// Returns `None` when the mock has no simulator.
    pub fn with_simulator<R>(&self, f: impl FnOnce(&mut SimulatedBootloader) -> R) -> Option<R> {
        self.bootloader.as_ref().map(|b| f(&mut lock(b)))
    }

    /// Get all captured sends.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        lock(&self.write_log).clone()
    }

    /// Clear captured sends.
    pub fn clear_writes(&self) {
        lock(&self.write_log).clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *lock(&self.connected) = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *lock(&self.connected) = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DfuTransport for MockTransport {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        lock(&self.write_log).push(data.to_vec());
        if let Some(bootloader) = &self.bootloader {
            if let Some(reply) = lock(bootloader).respond(data) {
                lock(&self.pending).push_back(reply);
            }
        }
        Ok(())
    }

    fn receive(&self) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        if let Some(reply) = lock(&self.reply_queue).pop_front() {
            // A queued reply overrides whatever the simulator produced.
            lock(&self.pending).pop_front();
            return Ok(reply);
        }
        lock(&self.pending)
            .pop_front()
            .ok_or(TransportError::Timeout {
                timeout_ms: TRANSFER_TIMEOUT_MS,
            })
    }

    fn is_connected(&self) -> bool {
        *lock(&self.connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HostOutcome, PacketCodec, validate_ack};

    #[test]
    fn test_mock_reply_queue() {
        let mock = MockTransport::new();
        mock.queue_error(DeviceError::PacketOverrun);
        mock.queue_reply(&[0x02]);

        let first = mock.receive().unwrap();
        assert_eq!(first, vec![0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(mock.receive().unwrap(), vec![0x02]);

        // Queue is empty now
        assert!(matches!(
            mock.receive(),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        mock.send(b"Hello").unwrap();
        mock.send(b"World").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");

        mock.clear_writes();
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(matches!(mock.send(b"test"), Err(TransportError::Disconnected)));
        assert!(matches!(mock.receive(), Err(TransportError::Disconnected)));

        mock.reconnect();
        assert!(mock.send(b"test").is_ok());
    }

    #[test]
    fn test_mock_with_bootloader() {
        let mock = MockTransport::with_bootloader(SimulatedBootloader::ready());
        let start = PacketCodec::build_start(3, 0);
        let reply = mock.exchange(&start).unwrap();
        assert_eq!(validate_ack(&reply, &start), HostOutcome::None);

        let data = PacketCodec::new().build_data(b"xyz", true);
        let reply = mock.exchange(&data).unwrap();
        assert_eq!(validate_ack(&reply, &data), HostOutcome::None);

        assert_eq!(mock.with_simulator(|sim| sim.is_complete()), Some(true));

        // The device has left DFU mode; surplus DATA goes unanswered.
        let extra = PacketCodec::new().build_data(b"!", false);
        assert!(matches!(
            mock.exchange(&extra),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_queued_reply_overrides_simulator() {
        let mock = MockTransport::with_bootloader(SimulatedBootloader::ready());
        mock.queue_reply(&[0xFF; 3]);
        let start = PacketCodec::build_start(3, 0);
        let reply = mock.exchange(&start).unwrap();
        assert_eq!(validate_ack(&reply, &start), HostOutcome::SizeTooLarge);
        // The simulator's own reply was discarded.
        assert!(mock.receive().is_err());
    }

    #[test]
    fn test_queue_ack_for() {
        let mock = MockTransport::new();
        let start = PacketCodec::build_start(42, 7);
        mock.queue_ack_for(&start);
        let reply = mock.exchange(&start).unwrap();
        assert_eq!(validate_ack(&reply, &start), HostOutcome::None);
        assert!(mock.with_simulator(|_| ()).is_none());
    }
}
