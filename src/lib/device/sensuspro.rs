//! Reefnet Sensus Pro.
//!
//! The device only talks after being woken by a break condition. It answers
//! with a handshake frame carrying its identity and clock, then accepts a
//! single command byte. The whole memory comes back in one CRC-protected
//! stream; dives inside it are delimited by marker bytes.

use std::any::Any;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::warn;

use super::{Backend, Device, DeviceContext, DiveCallback, Family};
use crate::array;
use crate::checksum;
use crate::error::{DeviceError, ProtocolError, Result};
use crate::event::{Clock, DevInfo, Event, Progress};
use crate::extract::{self, MarkerLayout};
use crate::port::{LineSettings, Queue, Transport};
use crate::protocol;

pub const HANDSHAKE_SIZE: usize = 10;
pub const MEMORY_SIZE: usize = 56320;

const LINE: LineSettings = LineSettings::n81(19200);
const TIMEOUT: Duration = Duration::from_millis(3000);
const READ_CHUNK: usize = 256;
const SETTLE_MS: u64 = 10;

const CMD_DUMP: u8 = 0xB4;
const CMD_INTERVAL: u8 = 0xB5;

const LAYOUT: MarkerLayout = MarkerLayout {
    header: &[0x00, 0x00, 0x00, 0x00],
    footer: &[0xFF, 0xFF],
    timestamp_offset: 6,
    skip: 10,
};

pub struct SensusPro {
    port: Box<dyn Transport>,
    handshake: [u8; HANDSHAKE_SIZE],
    timestamp: Option<u32>,
    devtime: u32,
    systime: Option<i64>,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl SensusPro {
    pub(crate) fn open(mut port: Box<dyn Transport>) -> Result<Self> {
        if let Err(e) = port.configure(&LINE) {
            warn!("Failed to set the terminal attributes.");
            return Err(e.into());
        }

        if let Err(e) = port.set_timeout(TIMEOUT) {
            warn!("Failed to set the timeout.");
            return Err(e.into());
        }

        port.flush(Queue::Both)?;

        Ok(SensusPro {
            port,
            handshake: [0; HANDSHAKE_SIZE],
            timestamp: None,
            devtime: 0,
            systime: None,
        })
    }

    /// Device clock and host time recorded at the last handshake.
    pub fn clock(&self) -> Option<Clock> {
        self.systime.map(|systime| Clock {
            systime,
            devtime: self.devtime,
        })
    }

    fn wake(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        let mut handshake = [0u8; HANDSHAKE_SIZE];
        protocol::handshake(self.port.as_mut(), &mut handshake)?;

        let systime = now();
        self.systime = Some(systime);
        self.devtime = array::uint32_le(&handshake[6..]);
        self.handshake = handshake;

        ctx.events.emit(Event::Clock(Clock {
            systime,
            devtime: self.devtime,
        }));
        ctx.events.emit(Event::DevInfo(DevInfo {
            model: handshake[0] as u32,
            firmware: handshake[1] as u32,
            serial: array::uint16_le(&handshake[4..]) as u32,
        }));

        self.port.sleep(SETTLE_MS);
        Ok(())
    }

    fn send(&mut self, ctx: &mut DeviceContext, command: u8) -> Result<()> {
        self.wake(ctx)?;

        if let Err(e) = protocol::write_exact(self.port.as_mut(), &[command]) {
            warn!("Failed to send the command.");
            return Err(e);
        }
        Ok(())
    }

    fn write_interval(&mut self, ctx: &mut DeviceContext, interval: u8) -> Result<()> {
        if !(1..=127).contains(&interval) {
            return Err(DeviceError::invalid(format!(
                "sample interval {} out of range 1..=127",
                interval
            )));
        }

        self.send(ctx, CMD_INTERVAL)?;
        self.port.sleep(SETTLE_MS);

        if let Err(e) = protocol::write_exact(self.port.as_mut(), &[interval]) {
            warn!("Failed to send the new value.");
            return Err(e);
        }
        Ok(())
    }
}

impl Backend for SensusPro {
    fn family(&self) -> Family {
        Family::ReefnetSensusPro
    }

    fn set_fingerprint(&mut self, _ctx: &mut DeviceContext, data: &[u8]) -> Result<()> {
        self.timestamp = match data.len() {
            0 => None,
            4 => Some(array::uint32_le(data)),
            n => {
                return Err(DeviceError::invalid(format!(
                    "fingerprint must be 4 bytes, got {}",
                    n
                )))
            }
        };
        Ok(())
    }

    fn dump(&mut self, ctx: &mut DeviceContext, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.clear();
        buffer.try_reserve(MEMORY_SIZE)?;

        let mut progress = Progress::new((MEMORY_SIZE + 2) as u32);
        ctx.events.emit(Event::Progress(progress));

        self.send(ctx, CMD_DUMP)?;

        let mut answer = vec![0u8; MEMORY_SIZE + 2];
        for chunk in answer.chunks_mut(READ_CHUNK) {
            if let Err(e) = protocol::read_exact(self.port.as_mut(), chunk) {
                warn!("Failed to receive the answer.");
                return Err(e);
            }
            progress.advance(chunk.len(), &mut ctx.events);
        }

        let crc = array::uint16_le(&answer[MEMORY_SIZE..]);
        let ccrc = checksum::crc_ccitt(&answer[..MEMORY_SIZE]);
        if crc != ccrc {
            warn!("Unexpected answer CRC.");
            return Err(ProtocolError::BadChecksum.into());
        }

        buffer.extend_from_slice(&answer[..MEMORY_SIZE]);
        Ok(())
    }

    fn foreach(&mut self, ctx: &mut DeviceContext, callback: &mut DiveCallback) -> Result<()> {
        let mut buffer = Vec::new();
        self.dump(ctx, &mut buffer)?;
        extract::extract_dives(&buffer, &LAYOUT, self.timestamp, callback)
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.port.close()?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Copies the frame received during the last handshake into `data`.
pub fn handshake(device: &Device, data: &mut [u8]) -> Result<()> {
    let backend = device.backend::<SensusPro>()?;
    if data.len() < HANDSHAKE_SIZE {
        warn!("Insufficient buffer space available.");
        return Err(DeviceError::invalid("handshake buffer too small"));
    }
    data[..HANDSHAKE_SIZE].copy_from_slice(&backend.handshake);
    Ok(())
}

/// Clock pair recorded at the last handshake, if one happened yet.
pub fn clock(device: &Device) -> Result<Option<Clock>> {
    Ok(device.backend::<SensusPro>()?.clock())
}

/// Sets the download cutoff directly from a device timestamp.
pub fn set_timestamp(device: &mut Device, timestamp: u32) -> Result<()> {
    let (backend, _) = device.backend_mut::<SensusPro>()?;
    backend.timestamp = Some(timestamp);
    Ok(())
}

/// Changes the sample interval, in seconds (1 to 127).
pub fn write_interval(device: &mut Device, interval: u8) -> Result<()> {
    let (backend, ctx) = device.backend_mut::<SensusPro>()?;
    backend.write_interval(ctx, interval)
}

/// Splits a memory dump into dives. With a device, its fingerprint limits the
/// result to newer dives.
pub fn extract_dives<F>(device: Option<&Device>, data: &[u8], callback: F) -> Result<()>
where
    F: FnMut(&[u8], &[u8]) -> bool,
{
    let cutoff = match device {
        Some(device) => device.backend::<SensusPro>()?.timestamp,
        None => None,
    };
    extract::extract_dives(data, &LAYOUT, cutoff, callback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{Call, MockTransport};
    use std::sync::{Arc, Mutex};

    fn handshake_frame() -> Vec<u8> {
        let mut frame = vec![0x02, 0x15, 0x00, 0x00, 0x39, 0x30, 0x10, 0x27, 0x00, 0x00];
        let crc = checksum::crc_ccitt(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    fn dive(timestamp: u32) -> Vec<u8> {
        let mut data = vec![0x00, 0x00, 0x00, 0x00, 0x3C, 0x01];
        data.extend_from_slice(&timestamp.to_le_bytes());
        data.extend_from_slice(&[0x21, 0x22, 0x23, 0x24, 0xFF, 0xFF]);
        data
    }

    fn memory(dives: &[u32]) -> Vec<u8> {
        let mut data = Vec::new();
        for &ts in dives {
            data.extend(dive(ts));
        }
        data.resize(MEMORY_SIZE, 0x55);
        let crc = checksum::crc_ccitt(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        data
    }

    fn open(mock: &MockTransport) -> Device {
        Device::open_transport(Family::ReefnetSensusPro, mock.boxed()).unwrap()
    }

    #[test]
    fn open_configures_port() {
        let mock = MockTransport::new();
        let _device = open(&mock);

        assert_eq!(
            mock.calls(),
            vec![
                Call::Configure(LineSettings::n81(19200)),
                Call::Timeout(Duration::from_millis(3000)),
                Call::Flush(Queue::Both),
            ]
        );
    }

    #[test]
    fn dump_emits_events() {
        let mock = MockTransport::new();
        mock.queue(&handshake_frame());
        mock.queue(&memory(&[100, 200]));
        let mut device = open(&mock);

        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        device.set_events(move |e| log.lock().unwrap().push(*e));

        let mut buffer = Vec::new();
        device.dump(&mut buffer).unwrap();
        assert_eq!(buffer.len(), MEMORY_SIZE);
        assert_eq!(&buffer[..16], &dive(100)[..]);
        assert!(mock.writes().contains(&vec![CMD_DUMP]));

        let events = events.lock().unwrap();
        assert!(events.contains(&Event::DevInfo(DevInfo {
            model: 2,
            firmware: 0x15,
            serial: 12345,
        })));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Clock(c) if c.devtime == 10000)));

        let progress: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                Event::Progress(p) => Some(p.current),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&((MEMORY_SIZE + 2) as u32)));

        let mut received = [0u8; HANDSHAKE_SIZE];
        handshake(&device, &mut received).unwrap();
        assert_eq!(&received[..], &handshake_frame()[..HANDSHAKE_SIZE]);
        assert_eq!(clock(&device).unwrap().map(|c| c.devtime), Some(10000));
    }

    #[test]
    fn dump_bad_crc_discards_data() {
        let mock = MockTransport::new();
        mock.queue(&handshake_frame());
        let mut data = memory(&[100]);
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        mock.queue(&data);
        let mut device = open(&mock);

        let mut buffer = vec![1, 2, 3];
        let err = device.dump(&mut buffer).unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(ProtocolError::BadChecksum)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn dump_short_stream_is_timeout() {
        let mock = MockTransport::new();
        mock.queue(&handshake_frame());
        mock.queue(&[0x55; 1000]);
        let mut device = open(&mock);

        let mut buffer = Vec::new();
        assert!(matches!(
            device.dump(&mut buffer),
            Err(DeviceError::Timeout)
        ));
    }

    #[test]
    fn foreach_honors_fingerprint() {
        let mock = MockTransport::new();
        mock.queue(&handshake_frame());
        mock.queue(&memory(&[100, 200, 300]));
        let mut device = open(&mock);
        device.set_fingerprint(&200u32.to_le_bytes()).unwrap();

        let mut seen = Vec::new();
        device
            .foreach(|_, fp| {
                seen.push(array::uint32_le(fp));
                true
            })
            .unwrap();
        assert_eq!(seen, vec![300]);
    }

    #[test]
    fn foreach_without_fingerprint() {
        let mock = MockTransport::new();
        mock.queue(&handshake_frame());
        mock.queue(&memory(&[100, 200, 300]));
        let mut device = open(&mock);
        device.set_fingerprint(&[]).unwrap();

        let mut seen = Vec::new();
        device
            .foreach(|data, fp| {
                assert_eq!(data.len(), 16);
                seen.push(array::uint32_le(fp));
                true
            })
            .unwrap();
        assert_eq!(seen, vec![300, 200, 100]);
    }

    #[test]
    fn fingerprint_size_checked() {
        let mock = MockTransport::new();
        let mut device = open(&mock);
        assert!(matches!(
            device.set_fingerprint(&[1, 2, 3]),
            Err(DeviceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn extract_with_device_timestamp() {
        let mock = MockTransport::new();
        let mut device = open(&mock);
        set_timestamp(&mut device, 100).unwrap();

        let data = memory(&[100, 200]);
        let mut seen = Vec::new();
        extract_dives(Some(&device), &data[..MEMORY_SIZE], |_, fp| {
            seen.push(array::uint32_le(fp));
            true
        })
        .unwrap();
        assert_eq!(seen, vec![200]);

        seen.clear();
        extract_dives(None, &data[..MEMORY_SIZE], |_, fp| {
            seen.push(array::uint32_le(fp));
            true
        })
        .unwrap();
        assert_eq!(seen, vec![200, 100]);
    }

    #[test]
    fn interval_command() {
        let mock = MockTransport::new();
        mock.queue(&handshake_frame());
        let mut device = open(&mock);

        write_interval(&mut device, 10).unwrap();
        assert_eq!(mock.writes(), vec![vec![CMD_INTERVAL], vec![10]]);

        assert!(matches!(
            write_interval(&mut device, 0),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            write_interval(&mut device, 128),
            Err(DeviceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn close_releases_transport() {
        let mock = MockTransport::new();
        let device = open(&mock);

        device.close().unwrap();
        assert_eq!(mock.calls().last(), Some(&Call::Close));
    }

    #[test]
    fn handshake_buffer_too_small() {
        let mock = MockTransport::new();
        let device = open(&mock);
        let mut data = [0u8; 4];
        assert!(matches!(
            handshake(&device, &mut data),
            Err(DeviceError::InvalidArgument(_))
        ));
    }
}
