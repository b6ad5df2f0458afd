//! In-memory model of the device-side bootloader.
//!
//! Mirrors how the firmware answers START and DATA packets so the host
//! logic can be exercised without hardware. Flash and NVM are not modelled;
//! accepted payloads are simply appended to an image buffer. Once the
//! announced size has been received the device jumps to the application and
//! answers nothing further.

use tracing::debug;

use crate::protocol::{AckPacket, CrcEngine, DeviceError, MessageId, checksum_without_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    Idle,
    Receive,
    JumpToApp,
}

/// Simulated bootloader.
#[derive(Debug)]
pub struct SimulatedBootloader {
    state: DeviceState,
    dfu_requested: bool,
    expected_sequence: u8,
    app_size: u32,
    app_crc: u32,
    image: Vec<u8>,
    corrupt_next_ack: bool,
    inject_error: Option<DeviceError>,
    packets_received: usize,
}

impl SimulatedBootloader {
    /// Bootloader that has not been asked to enter DFU.
    pub fn new() -> Self {
        Self {
            state: DeviceState::Idle,
            dfu_requested: false,
            expected_sequence: 0,
            app_size: 0,
            app_crc: 0,
            image: Vec::new(),
            corrupt_next_ack: false,
            inject_error: None,
            packets_received: 0,
        }
    }

    /// Bootloader whose application already requested DFU mode.
    pub fn ready() -> Self {
        let mut sim = Self::new();
        sim.request_enter_dfu();
        sim
    }

    /// Equivalent of the application calling the enter-DFU request API.
    pub fn request_enter_dfu(&mut self) {
        self.dfu_requested = true;
    }

    /// Flip a bit in the checksum of the next successful ACK.
    pub fn corrupt_next_ack(&mut self) {
        self.corrupt_next_ack = true;
    }

    /// Answer the next packet with `error` instead of processing it.
    pub fn fail_next(&mut self, error: DeviceError) {
        self.inject_error = Some(error);
    }

    /// Size announced by the last accepted START.
    pub fn announced_size(&self) -> u32 {
        self.app_size
    }

    /// Image checksum announced by the last accepted START.
    pub fn announced_crc(&self) -> u32 {
        self.app_crc
    }

    /// Payload bytes accepted since the last START.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn packets_received(&self) -> usize {
        self.packets_received
    }

    /// All announced bytes were received and the device left DFU mode.
    pub fn is_complete(&self) -> bool {
        self.state == DeviceState::JumpToApp
    }

    /// Process one host packet and produce the raw ACK bytes.
    ///
    /// Returns `None` once the device has jumped to the application.
    pub fn respond(&mut self, packet: &[u8]) -> Option<Vec<u8>> {
        self.packets_received += 1;

        if self.state == DeviceState::JumpToApp {
            debug!(len = packet.len(), "Simulated bootloader ignored packet after completion");
            return None;
        }

        if let Some(error) = self.inject_error.take() {
            return Some(self.reject(error));
        }

        let ack = match (self.state, id_of(packet)) {
            (_, Some(MessageId::Start)) if packet.len() == 8 => {
                if self.dfu_requested {
                    self.accept_start(packet)
                } else {
                    self.reject(DeviceError::EnterDfuNotRequested)
                }
            }
            (DeviceState::Receive, Some(MessageId::Data)) if packet.len() >= 2 => {
                self.accept_data(packet)
            }
            (DeviceState::Idle, Some(MessageId::Data)) => {
                self.reject(DeviceError::OutOfSequence)
            }
            _ => self.reject(DeviceError::InvalidMessageId),
        };
        Some(ack)
    }

    fn accept_start(&mut self, packet: &[u8]) -> Vec<u8> {
        self.app_size = u32::from_be_bytes([0, packet[1], packet[2], packet[3]]);
        self.app_crc = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        self.expected_sequence = 0;
        self.image.clear();
        self.state = DeviceState::Receive;
        let ack = self.acknowledge(packet);
        self.check_complete();
        debug!(
            app_size = self.app_size,
            app_crc = %format!("0x{:08X}", self.app_crc),
            "Simulated bootloader accepted START"
        );
        ack
    }

    fn accept_data(&mut self, packet: &[u8]) -> Vec<u8> {
        let sequence = packet[1];
        if sequence != self.expected_sequence {
            debug!(
                expected = self.expected_sequence,
                got = sequence,
                "Simulated bootloader saw out-of-sequence DATA"
            );
            return self.reject(DeviceError::OutOfSequence);
        }
        let payload = &packet[2..];
        if self.image.len() + payload.len() > self.app_size as usize {
            debug!(
                received = self.image.len(),
                payload = payload.len(),
                app_size = self.app_size,
                "Simulated bootloader saw DATA past the announced size"
            );
            return self.reject(DeviceError::PacketOverrun);
        }
        self.image.extend_from_slice(payload);
        self.expected_sequence = self.expected_sequence.wrapping_add(1);
        let ack = self.acknowledge(packet);
        self.check_complete();
        ack
    }

    fn check_complete(&mut self) {
        if self.image.len() == self.app_size as usize {
            debug!(app_size = self.app_size, "Simulated bootloader jumping to application");
            self.state = DeviceState::JumpToApp;
        }
    }

    fn acknowledge(&mut self, packet: &[u8]) -> Vec<u8> {
        let mut ack = AckPacket::acknowledging(packet);
        if std::mem::take(&mut self.corrupt_next_ack) {
            ack.crc ^= 0x0000_0001;
        }
        ack.to_bytes().to_vec()
    }

    /// Error ACKs send the device back to idle, like the firmware does.
    fn reject(&mut self, error: DeviceError) -> Vec<u8> {
        self.state = DeviceState::Idle;
        debug!(error = %error, "Simulated bootloader rejected packet");
        AckPacket::rejecting(error).to_bytes().to_vec()
    }

    /// Checksum the device would verify before jumping to the application.
    pub fn image_crc(&self) -> u32 {
        CrcEngine::compute(&self.image)
    }

    /// Checksum of `packet` as reported in a successful ACK.
    pub fn expected_ack_crc(packet: &[u8]) -> u32 {
        checksum_without_id(packet)
    }
}

fn id_of(packet: &[u8]) -> Option<MessageId> {
    packet.first().copied().map(MessageId::from)
}

impl Default for SimulatedBootloader {
    fn default() -> Self {
        Self::new()
    }
}
