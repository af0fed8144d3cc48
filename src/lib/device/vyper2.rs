//! Suunto Vyper2.
//!
//! Half-duplex packet protocol at 9600 baud; the interface is powered from DTR
//! and the direction is switched with RTS. Dives live in a ring buffer and are
//! chained through prev/next pointers stored at the start of each dive.

use std::any::Any;
use std::time::Duration;

use log::{debug, warn};

use super::{Backend, Device, DeviceContext, DiveCallback, Family};
use crate::array;
use crate::error::{DeviceError, Result};
use crate::event::{DevInfo, Event, Progress};
use crate::port::{LineSettings, Queue, Transport};
use crate::protocol;

pub const VERSION_SIZE: usize = 4;
pub const FINGERPRINT_SIZE: usize = 7;
pub const MEMORY_SIZE: usize = 0x8000;

const LINE: LineSettings = LineSettings::n81(9600);
const TIMEOUT: Duration = Duration::from_millis(3000);
const POWERUP_MS: u64 = 100;
const SETTLE_MS: u64 = 600;

/// Largest data block a single read or write packet carries.
const PACKET_SIZE: usize = 120;

const CMD_VERSION: u8 = 0x0F;
const CMD_READ: u8 = 0x05;
const CMD_WRITE: u8 = 0x06;
const CMD_RESET_MAXDEPTH: u8 = 0x20;

const SERIAL: u32 = 0x0023;
const RB_HEADER: u32 = 0x0190;
const RB_HEADER_SIZE: usize = 8;
const RB_BEGIN: u32 = 0x019A;
const RB_END: u32 = 0x7FFE;

const FP_OFFSET: usize = 0x15;
const FP_OFFSET_EXTENDED: usize = FP_OFFSET + 6;
const MODEL_EXTENDED: u8 = 0x15;

/// Bytes between two ring positions walking forward from `a` to `b`. Equal
/// positions mean an empty ring unless `full` is set.
fn distance(a: u32, b: u32, full: bool) -> u32 {
    if a < b {
        b - a
    } else if a > b {
        (RB_END - a) + (b - RB_BEGIN)
    } else if full {
        RB_END - RB_BEGIN
    } else {
        0
    }
}

fn in_ring(address: u32) -> bool {
    (RB_BEGIN..RB_END).contains(&address)
}

/// Ring pointers stored in the header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RingHeader {
    last: u32,
    count: u32,
    end: u32,
    begin: u32,
}

impl RingHeader {
    fn parse(data: &[u8]) -> Result<Self> {
        let header = RingHeader {
            last: array::uint16_le(&data[0..]) as u32,
            count: array::uint16_le(&data[2..]) as u32,
            end: array::uint16_le(&data[4..]) as u32,
            begin: array::uint16_le(&data[6..]) as u32,
        };

        if !(in_ring(header.last) && in_ring(header.end) && in_ring(header.begin)) {
            warn!("Invalid ringbuffer pointer detected.");
            return Err(DeviceError::DataFormat(format!(
                "ring pointers out of range: {:?}",
                header
            )));
        }

        Ok(header)
    }

    fn used(&self) -> u32 {
        distance(self.begin, self.end, self.count != 0)
    }
}

pub struct Vyper2 {
    port: Box<dyn Transport>,
    fingerprint: Option<[u8; FINGERPRINT_SIZE]>,
}

impl Vyper2 {
    pub(crate) fn open(mut port: Box<dyn Transport>) -> Result<Self> {
        if let Err(e) = port.configure(&LINE) {
            warn!("Failed to set the terminal attributes.");
            return Err(e.into());
        }

        if let Err(e) = port.set_timeout(TIMEOUT) {
            warn!("Failed to set the timeout.");
            return Err(e.into());
        }

        if let Err(e) = port.set_dtr(true) {
            warn!("Failed to set the DTR line.");
            return Err(e.into());
        }

        port.sleep(POWERUP_MS);
        port.flush(Queue::Both)?;
        port.set_halfduplex(true)?;

        Ok(Vyper2 {
            port,
            fingerprint: None,
        })
    }

    fn packet(
        &mut self,
        ctx: &DeviceContext,
        command: &[u8],
        answer: &mut [u8],
        size: usize,
    ) -> Result<()> {
        protocol::packet(self.port.as_mut(), &ctx.cancel, SETTLE_MS, command, answer, size)
    }

    fn read_version(&mut self, ctx: &DeviceContext) -> Result<[u8; VERSION_SIZE]> {
        let command = protocol::frame_command(&[CMD_VERSION, 0x00, 0x00]);
        let mut answer = [0u8; VERSION_SIZE + 4];
        self.packet(ctx, &command, &mut answer, VERSION_SIZE)?;

        let mut version = [0u8; VERSION_SIZE];
        version.copy_from_slice(&answer[3..3 + VERSION_SIZE]);
        Ok(version)
    }

    /// Reads `data.len()` bytes at `address`, one packet per block.
    fn read_memory(
        &mut self,
        ctx: &mut DeviceContext,
        address: u32,
        data: &mut [u8],
        mut progress: Option<&mut Progress>,
    ) -> Result<()> {
        let mut address = address;
        for block in data.chunks_mut(PACKET_SIZE) {
            let len = block.len();
            let command = protocol::frame_command(&[
                CMD_READ,
                0x00,
                0x03,
                (address >> 8) as u8,
                address as u8,
                len as u8,
            ]);
            let mut answer = vec![0u8; len + 7];
            self.packet(ctx, &command, &mut answer, len)?;
            block.copy_from_slice(&answer[6..6 + len]);

            if let Some(progress) = progress.as_deref_mut() {
                progress.advance(len, &mut ctx.events);
            }
            address += len as u32;
        }
        Ok(())
    }

    fn devinfo(&mut self, ctx: &mut DeviceContext, version: &[u8]) -> Result<()> {
        let mut serial = [0u8; 4];
        self.read_memory(ctx, SERIAL, &mut serial, None)?;
        ctx.events.emit(Event::DevInfo(DevInfo {
            model: version[0] as u32,
            firmware: array::uint24_be(&version[1..]),
            serial: array::bin2dec(&serial),
        }));
        Ok(())
    }

    fn reset_maxdepth(&mut self, ctx: &DeviceContext) -> Result<()> {
        let command = protocol::frame_command(&[CMD_RESET_MAXDEPTH, 0x00, 0x00]);
        let mut answer = [0u8; 4];
        self.packet(ctx, &command, &mut answer, 0)
    }
}

fn check_range(address: u32, len: usize) -> Result<()> {
    if address as usize + len > MEMORY_SIZE {
        return Err(DeviceError::invalid(format!(
            "range {:#06x}+{} outside device memory",
            address, len
        )));
    }
    Ok(())
}

impl Backend for Vyper2 {
    fn family(&self) -> Family {
        Family::SuuntoVyper2
    }

    fn set_fingerprint(&mut self, _ctx: &mut DeviceContext, data: &[u8]) -> Result<()> {
        self.fingerprint = match data.len() {
            0 => None,
            FINGERPRINT_SIZE => {
                let mut fp = [0u8; FINGERPRINT_SIZE];
                fp.copy_from_slice(data);
                Some(fp)
            }
            n => {
                return Err(DeviceError::invalid(format!(
                    "fingerprint must be {} bytes, got {}",
                    FINGERPRINT_SIZE, n
                )))
            }
        };
        Ok(())
    }

    fn version(&mut self, ctx: &mut DeviceContext, data: &mut [u8]) -> Result<()> {
        if data.len() < VERSION_SIZE {
            warn!("Insufficient buffer space available.");
            return Err(DeviceError::invalid("version buffer too small"));
        }

        let version = self.read_version(ctx)?;
        data[..VERSION_SIZE].copy_from_slice(&version);
        Ok(())
    }

    fn read(&mut self, ctx: &mut DeviceContext, address: u32, data: &mut [u8]) -> Result<()> {
        check_range(address, data.len())?;
        self.read_memory(ctx, address, data, None)
    }

    fn write(&mut self, ctx: &mut DeviceContext, address: u32, data: &[u8]) -> Result<()> {
        check_range(address, data.len())?;

        let mut address = address;
        for block in data.chunks(PACKET_SIZE) {
            let len = block.len();
            let mut body = vec![
                CMD_WRITE,
                0x00,
                (len + 3) as u8,
                (address >> 8) as u8,
                address as u8,
                len as u8,
            ];
            body.extend_from_slice(block);
            let command = protocol::frame_command(&body);

            let mut answer = [0u8; 7];
            self.packet(ctx, &command, &mut answer, 0)?;
            address += len as u32;
        }
        Ok(())
    }

    fn dump(&mut self, ctx: &mut DeviceContext, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.clear();
        buffer.try_reserve(MEMORY_SIZE)?;
        buffer.resize(MEMORY_SIZE, 0);

        let version = self.read_version(ctx)?;

        let mut progress = Progress::new(MEMORY_SIZE as u32);
        ctx.events.emit(Event::Progress(progress));
        self.read_memory(ctx, 0, buffer, Some(&mut progress))?;

        let serial = SERIAL as usize;
        ctx.events.emit(Event::DevInfo(DevInfo {
            model: version[0] as u32,
            firmware: array::uint24_be(&version[1..]),
            serial: array::bin2dec(&buffer[serial..serial + 4]),
        }));
        Ok(())
    }

    fn foreach(&mut self, ctx: &mut DeviceContext, callback: &mut DiveCallback) -> Result<()> {
        let version = self.read_version(ctx)?;
        self.devinfo(ctx, &version)?;

        let mut raw = [0u8; RB_HEADER_SIZE];
        self.read_memory(ctx, RB_HEADER, &mut raw, None)?;
        let header = RingHeader::parse(&raw)?;
        debug!("ring {:?}", header);

        let remaining = header.used() as usize;
        let mut progress = Progress::new((RB_HEADER_SIZE + remaining) as u32);
        progress.advance(RB_HEADER_SIZE, &mut ctx.events);

        let mut data = Vec::new();
        data.try_reserve(remaining)?;
        data.resize(remaining, 0);

        // Pull the profiles backwards from the newest byte, wrapping at the ring start.
        let mut address = header.end;
        let mut offset = remaining;
        while offset > 0 {
            if address == RB_BEGIN {
                address = RB_END;
            }
            let len = offset.min(PACKET_SIZE).min((address - RB_BEGIN) as usize);
            address -= len as u32;
            offset -= len;
            self.read_memory(ctx, address, &mut data[offset..offset + len], None)?;
            progress.advance(len, &mut ctx.events);
        }

        let fp_offset = if version[0] == MODEL_EXTENDED {
            FP_OFFSET_EXTENDED
        } else {
            FP_OFFSET
        };

        let mut current = header.last;
        let mut previous = header.end;
        let mut pos = remaining;
        while pos > 0 {
            let size = distance(current, previous, true) as usize;
            if size < 4 || size > pos {
                warn!("Unexpected profile size.");
                return Err(DeviceError::DataFormat(format!(
                    "dive at {:#06x} has invalid size {}",
                    current, size
                )));
            }

            let dive = &data[pos - size..pos];
            let prev = array::uint16_le(&dive[0..]) as u32;
            let next = array::uint16_le(&dive[2..]) as u32;
            if next != previous {
                warn!("Profiles are not continuous.");
                return Err(DeviceError::DataFormat(format!(
                    "dive at {:#06x} points to {:#06x}, expected {:#06x}",
                    current, next, previous
                )));
            }

            if fp_offset + FINGERPRINT_SIZE > size {
                warn!("Unexpected profile size.");
                return Err(DeviceError::DataFormat(format!(
                    "dive at {:#06x} too short for a fingerprint",
                    current
                )));
            }
            let fingerprint = &dive[fp_offset..fp_offset + FINGERPRINT_SIZE];

            if matches!(self.fingerprint, Some(fp) if fp[..] == *fingerprint) {
                debug!("dive at {:#06x} already downloaded, stopping", current);
                return Ok(());
            }

            if !callback(dive, fingerprint) {
                return Ok(());
            }

            pos -= size;
            if pos > 0 && !in_ring(prev) {
                warn!("Invalid ringbuffer pointer detected.");
                return Err(DeviceError::DataFormat(format!(
                    "dive at {:#06x} links to {:#06x} outside the ring",
                    current, prev
                )));
            }

            previous = current;
            current = prev;
        }

        Ok(())
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

/// Clears the maximum depth the device remembers.
pub fn reset_maxdepth(device: &mut Device) -> Result<()> {
    let (backend, ctx) = device.backend_mut::<Vyper2>()?;
    backend.reset_maxdepth(ctx)
}
