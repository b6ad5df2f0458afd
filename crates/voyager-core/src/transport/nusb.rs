//! nusb-based USB transport implementation.
//!
//! The bootloader exposes one bulk OUT endpoint for START/DATA packets and
//! one bulk IN endpoint for the 8-byte ACK on interface 0. Both endpoints are
//! claimed when the device is opened and held for the whole session.

use std::io::{self, Read, Write};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use nusb::descriptors::TransferType;
use nusb::io::{EndpointRead, EndpointWrite};
use nusb::transfer::{Bulk, Direction, In, Out};
use nusb::{Device, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{DfuTransport, TransportError};
use crate::protocol::constants::{
    ACK_PACKET_SIZE, BULK_BUFFER_SIZE, MAX_REPLY_SIZE, TRANSFER_TIMEOUT_MS,
};

const DFU_INTERFACE: u8 = 0;

/// nusb-based USB transport.
pub struct NusbTransport {
    writer: Mutex<EndpointWrite<Bulk>>,
    reader: Mutex<EndpointRead<Bulk>>,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Open a device with specific VID/PID.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        let (in_addr, out_addr) = bulk_endpoints(&device)?;

        let interface = device
            .claim_interface(DFU_INTERFACE)
            .wait()
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface: DFU_INTERFACE,
                message: e.to_string(),
            })?;

        let timeout = Duration::from_millis(TRANSFER_TIMEOUT_MS);
        let mut writer = interface
            .endpoint::<Bulk, Out>(out_addr)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .writer(BULK_BUFFER_SIZE);
        writer.set_write_timeout(timeout);
        let mut reader = interface
            .endpoint::<Bulk, In>(in_addr)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .reader(BULK_BUFFER_SIZE);
        reader.set_read_timeout(timeout);

        info!(
            in_ep = %format!("0x{:02X}", in_addr),
            out_ep = %format!("0x{:02X}", out_addr),
            "Bootloader opened"
        );

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            vid,
            pid,
        })
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }
}

/// Addresses of the (IN, OUT) bulk endpoints of the DFU interface.
fn bulk_endpoints(device: &Device) -> Result<(u8, u8), TransportError> {
    let config = device
        .active_configuration()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

    let mut in_addr = None;
    let mut out_addr = None;
    for alt in config
        .interface_alt_settings()
        .filter(|alt| alt.interface_number() == DFU_INTERFACE)
    {
        for ep in alt
            .endpoints()
            .filter(|ep| ep.transfer_type() == TransferType::Bulk)
        {
            match ep.direction() {
                Direction::In => in_addr = in_addr.or(Some(ep.address())),
                Direction::Out => out_addr = out_addr.or(Some(ep.address())),
            }
        }
    }

    let missing = |direction: &str| TransportError::EndpointNotFound {
        ep_type: "Bulk".into(),
        direction: direction.into(),
    };
    Ok((in_addr.ok_or_else(|| missing("In"))?, out_addr.ok_or_else(|| missing("Out"))?))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Write one packet and push it out as a single bulk transfer.
fn write_packet<W: Write>(writer: &mut W, packet: &[u8]) -> Result<(), TransportError> {
    writer
        .write_all(packet)
        .and_then(|_| writer.flush())
        .map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut => TransportError::Timeout {
                timeout_ms: TRANSFER_TIMEOUT_MS,
            },
            _ => TransportError::SendFailed(e.to_string()),
        })
}

/// Collect one ACK frame.
///
/// Bulk reads may hand back a frame in pieces, so reading continues until a
/// full ACK is buffered. A timeout with a partial frame returns the partial
/// bytes and leaves the length check to the ACK validator.
fn read_reply<R: Read>(reader: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut buf = vec![0u8; MAX_REPLY_SIZE];
    let mut filled = 0;

    while filled < ACK_PACKET_SIZE {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::TimedOut && filled > 0 => break,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(TransportError::Timeout {
                    timeout_ms: TRANSFER_TIMEOUT_MS,
                });
            }
            Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
        }
    }

    if filled != ACK_PACKET_SIZE {
        warn!(
            bytes_read = filled,
            expected = ACK_PACKET_SIZE,
            "Reply is not a whole ACK frame"
        );
    }
    buf.truncate(filled);
    Ok(buf)
}

impl DfuTransport for NusbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        write_packet(&mut *lock(&self.writer), data)?;
        debug!(bytes_written = data.len(), "Send complete");
        Ok(())
    }

    #[instrument(skip(self))]
    fn receive(&self) -> Result<Vec<u8>, TransportError> {
        let reply = read_reply(&mut *lock(&self.reader))?;
        debug!(bytes_read = reply.len(), "Receive complete");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Reader handing out scripted results one `read` call at a time.
    struct ScriptedReader(VecDeque<io::Result<Vec<u8>>>);

    impl ScriptedReader {
        fn new(script: Vec<io::Result<Vec<u8>>>) -> Self {
            Self(script.into())
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    fn timed_out() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, "timed out")
    }

    const ACK: [u8; 8] = [0x02, 0x00, 0x11, 0x22, 0x33, 0x44, 0x00, 0x00];

    #[test]
    fn test_read_whole_ack() {
        let mut reader = ScriptedReader::new(vec![Ok(ACK.to_vec())]);
        assert_eq!(read_reply(&mut reader).unwrap(), ACK.to_vec());
    }

    #[test]
    fn test_read_ack_in_pieces() {
        let mut reader = ScriptedReader::new(vec![
            Ok(ACK[..3].to_vec()),
            Err(io::Error::new(io::ErrorKind::Interrupted, "signal")),
            Ok(ACK[3..].to_vec()),
        ]);
        assert_eq!(read_reply(&mut reader).unwrap(), ACK.to_vec());
    }

    #[test]
    fn test_partial_frame_on_timeout() {
        let mut reader = ScriptedReader::new(vec![Ok(ACK[..5].to_vec()), Err(timed_out())]);
        assert_eq!(read_reply(&mut reader).unwrap(), ACK[..5].to_vec());
    }

    #[test]
    fn test_timeout_without_data() {
        let mut reader = ScriptedReader::new(vec![Err(timed_out())]);
        assert!(matches!(
            read_reply(&mut reader),
            Err(TransportError::Timeout { timeout_ms: TRANSFER_TIMEOUT_MS })
        ));
    }

    #[test]
    fn test_read_failure() {
        let mut reader = ScriptedReader::new(vec![Err(io::Error::other("stall"))]);
        assert!(matches!(
            read_reply(&mut reader),
            Err(TransportError::ReceiveFailed(_))
        ));
    }

    #[test]
    fn test_oversized_reply_kept_whole() {
        let mut reader = ScriptedReader::new(vec![Ok(vec![0x02; 12])]);
        assert_eq!(read_reply(&mut reader).unwrap().len(), 12);
    }

    #[test]
    fn test_write_packet() {
        let mut out = Vec::new();
        write_packet(&mut out, &[0x03, 0x00, 0xAA]).unwrap();
        assert_eq!(out, vec![0x03, 0x00, 0xAA]);
    }

    struct StalledWriter;

    impl Write for StalledWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(timed_out())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_timeout() {
        assert!(matches!(
            write_packet(&mut StalledWriter, &[0x01; 8]),
            Err(TransportError::Timeout { .. })
        ));
    }
}
