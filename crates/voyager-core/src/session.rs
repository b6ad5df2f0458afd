//! DFU Session - High-level orchestrator for one image transfer.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::events::{DfuEvent, DfuObserver, DfuPhase, PacketDirection, TracingObserver};
use crate::payload::FirmwareImage;
use crate::protocol::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_DEVICE_WAIT_SECS, DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID,
};
use crate::protocol::{HostOutcome, PacketCodec, validate_ack};
use crate::state::{TransferMachine, TransferState};
use crate::transport::{DfuTransport, NusbTransport, TransportError};

/// Configuration for a DFU session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Path to the application image.
    pub image_path: Option<String>,
    /// USB vendor ID of the bootloader.
    pub vendor_id: u16,
    /// USB product ID of the bootloader.
    pub product_id: u16,
    /// DATA payload size in bytes.
    pub chunk_size: usize,
    /// How long to wait for the device to show up, in seconds.
    pub device_wait_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            image_path: None,
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            chunk_size: DEFAULT_CHUNK_SIZE,
            device_wait_secs: DEFAULT_DEVICE_WAIT_SECS,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Why a transfer did not reach DONE.
///
/// Returned inside the `anyhow::Error` of [`DfuSession::run`]; downcast to
/// decide on a retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Transfer rejected in {stage}: {outcome}")]
    Rejected {
        outcome: HostOutcome,
        stage: TransferState,
    },
    #[error("No application image configured")]
    NoImage,
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub app_size: u32,
    pub app_crc: u32,
    pub chunks: usize,
    pub packets_sent: usize,
}

/// DFU Session - drives one START + DATA* transfer.
pub struct DfuSession<O: DfuObserver> {
    config: SessionConfig,
    observer: Arc<O>,
    image: Option<FirmwareImage>,
}

impl DfuSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: DfuObserver + 'static> DfuSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            config,
            observer,
            image: None,
        }
    }

    /// Use an in-memory image instead of `config.image_path`.
    pub fn with_image(mut self, image: FirmwareImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn emit(&self, event: DfuEvent) {
        self.observer.on_event(&event);
    }

    fn load_image(&mut self) -> Result<()> {
        if self.image.is_some() {
            return Ok(());
        }
        let path = self
            .config
            .image_path
            .as_ref()
            .ok_or(TransferError::NoImage)?;
        info!(path = %path, "Loading application image");
        self.image = Some(FirmwareImage::load(path)?);
        Ok(())
    }

    /// Open the configured USB bootloader and transfer the image.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<TransferReport> {
        self.load_image()?;
        let transport = self.wait_for_device()?;
        self.run_with_transport(&transport)
    }

    fn wait_for_device(&self) -> Result<NusbTransport> {
        info!("Waiting for device...");
        let timeout = Duration::from_secs(self.config.device_wait_secs);
        let start = Instant::now();
        let mut poll_count = 0u64;

        loop {
            poll_count += 1;

            match NusbTransport::open_with_ids(self.config.vendor_id, self.config.product_id) {
                Ok(t) => {
                    info!(
                        vid = format!("{:04X}", t.vendor_id()),
                        pid = format!("{:04X}", t.product_id()),
                        "Device found after {} polls",
                        poll_count
                    );
                    return Ok(t);
                }
                Err(TransportError::DeviceNotFound { .. }) => {
                    if start.elapsed() > timeout {
                        return Err(anyhow!(
                            "Timeout waiting for device after {}s",
                            timeout.as_secs()
                        ));
                    }
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Transfer the image over an already opened transport.
    #[instrument(skip(self, transport))]
    pub fn run_with_transport<T: DfuTransport>(&mut self, transport: &T) -> Result<TransferReport> {
        self.load_image()?;
        let image = self.image.as_ref().ok_or(TransferError::NoImage)?;
        let chunks: Vec<&[u8]> = image.chunks(self.config.chunk_size)?.collect();

        let transport = ObservableTransport {
            inner: transport,
            observer: &self.observer,
        };
        let mut machine = TransferMachine::new(chunks.len());
        let mut codec = PacketCodec::new();
        let mut packets_sent = 0usize;
        let mut bytes_acked = 0u64;
        let total_bytes = image.len() as u64;

        info!(
            size = image.len(),
            crc = %format!("0x{:08X}", image.crc()),
            chunks = chunks.len(),
            "Starting transfer"
        );
        self.emit(DfuEvent::PhaseChanged {
            from: DfuPhase::WaitingForDevice,
            to: DfuPhase::Start,
        });

        loop {
            let packet = match machine.state() {
                // FirmwareImage already bounds the size to 24 bits.
                TransferState::SendStart => {
                    PacketCodec::build_start(image.app_size() as u64, image.crc()).to_vec()
                }
                TransferState::SendData { chunk } => {
                    if chunk == 0 {
                        self.emit(DfuEvent::PhaseChanged {
                            from: DfuPhase::Start,
                            to: DfuPhase::Transfer,
                        });
                    }
                    codec.build_data(chunks[chunk], machine.resets_sequence())
                }
                TransferState::Done => break,
                other => return Err(anyhow!("Transfer stuck in state {}", other)),
            };

            if let Err(e) = transport.send(&packet) {
                self.fail(machine.state(), None, &e.to_string());
                return Err(e.into());
            }
            packets_sent += 1;
            let stage = machine.packet_sent()?;

            let reply = match transport.receive() {
                Ok(r) => r,
                Err(e) => {
                    self.fail(stage, None, &e.to_string());
                    return Err(e.into());
                }
            };

            let outcome = validate_ack(&reply, &packet);
            self.emit(DfuEvent::AckReceived { outcome });

            let next = machine.ack_received(outcome)?;
            self.emit(DfuEvent::StateChanged { state: next });

            if let TransferState::Failed { outcome } = next {
                let err = TransferError::Rejected { outcome, stage };
                self.fail(stage, Some(outcome), &err.to_string());
                return Err(err.into());
            }

            if let TransferState::WaitDataAck { chunk } = stage {
                bytes_acked += chunks[chunk].len() as u64;
                self.emit(DfuEvent::Progress {
                    current: bytes_acked,
                    total: total_bytes,
                });
            }
        }

        self.emit(DfuEvent::PhaseChanged {
            from: if chunks.is_empty() {
                DfuPhase::Start
            } else {
                DfuPhase::Transfer
            },
            to: DfuPhase::Complete,
        });
        self.emit(DfuEvent::Complete);

        Ok(TransferReport {
            app_size: image.app_size(),
            app_crc: image.crc(),
            chunks: chunks.len(),
            packets_sent,
        })
    }

    fn fail(&self, stage: TransferState, outcome: Option<HostOutcome>, message: &str) {
        warn!(stage = %stage, "Transfer failed: {}", message);
        let from = match stage {
            TransferState::SendStart | TransferState::WaitStartAck => DfuPhase::Start,
            _ => DfuPhase::Transfer,
        };
        self.emit(DfuEvent::Error {
            outcome,
            message: message.to_string(),
        });
        self.emit(DfuEvent::PhaseChanged {
            from,
            to: DfuPhase::Error,
        });
    }
}

/// Transport wrapper that emits packet events.
struct ObservableTransport<'a, T: DfuTransport, O: DfuObserver> {
    inner: &'a T,
    observer: &'a Arc<O>,
}

impl<T: DfuTransport, O: DfuObserver> DfuTransport for ObservableTransport<'_, T, O> {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let res = self.inner.send(data);
        if res.is_ok() {
            self.observer.on_event(&DfuEvent::Packet {
                direction: PacketDirection::Tx,
                length: data.len(),
                data: Some(data.iter().take(32).cloned().collect()),
            });
        }
        res
    }

    fn receive(&self) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.receive();
        if let Ok(data) = &res {
            self.observer.on_event(&DfuEvent::Packet {
                direction: PacketDirection::Rx,
                length: data.len(),
                data: Some(data.clone()),
            });
        }
        res
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}
