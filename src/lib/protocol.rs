//! Framing and validation shared by the device families.
//!
//! Two exchange shapes exist: a break-triggered handshake that makes the device
//! push a CRC-protected frame, and a half-duplex command/answer packet where the
//! answer echoes the command header and ends in an XOR checksum.

use std::io;

use log::{debug, warn};

use crate::array;
use crate::cancel::CancelToken;
use crate::checksum;
use crate::error::{DeviceError, ProtocolError, Result};
use crate::port::Transport;

/// Header byte, two length bytes and the trailing checksum.
pub const PACKET_OVERHEAD: usize = 4;

fn check_transfer(result: io::Result<usize>, expected: usize) -> Result<()> {
    match result {
        Ok(n) if n == expected => Ok(()),
        Ok(n) => {
            debug!("short transfer: {} of {} bytes", n, expected);
            Err(DeviceError::Timeout)
        }
        Err(e) => Err(DeviceError::Io(e)),
    }
}

pub fn read_exact(port: &mut dyn Transport, buf: &mut [u8]) -> Result<()> {
    let expected = buf.len();
    check_transfer(port.read(buf), expected)
}

pub fn write_exact(port: &mut dyn Transport, data: &[u8]) -> Result<()> {
    check_transfer(port.write(data), data.len())
}

/// Wakes the device with a break condition and receives its handshake frame
/// into `payload`. The frame on the wire is `payload.len()` bytes followed by a
/// little-endian CRC-CCITT of those bytes.
pub fn handshake(port: &mut dyn Transport, payload: &mut [u8]) -> Result<()> {
    let size = payload.len();
    let mut frame = vec![0u8; size + 2];

    port.set_break(true)?;
    let received = read_exact(port, &mut frame);
    port.set_break(false)?;

    if let Err(e) = received {
        warn!("Failed to receive the handshake.");
        return Err(e);
    }
    debug!("recv {:02X?}", frame);

    let crc = array::uint16_le(&frame[size..]);
    let ccrc = checksum::crc_ccitt(&frame[..size]);
    if crc != ccrc {
        warn!("Unexpected answer CRC.");
        return Err(ProtocolError::BadChecksum.into());
    }

    payload.copy_from_slice(&frame[..size]);
    Ok(())
}

/// Appends the XOR checksum expected at the end of every command.
pub fn frame_command(body: &[u8]) -> Vec<u8> {
    let mut command = Vec::with_capacity(body.len() + 1);
    command.extend_from_slice(body);
    command.push(checksum::xor8(body, 0x00));
    command
}

/// Checks an answer against the command that triggered it. `size` is the number
/// of data bytes the answer carries after the echoed parameters.
pub fn validate_answer(
    command: &[u8],
    answer: &[u8],
    size: usize,
) -> std::result::Result<(), ProtocolError> {
    let asize = answer.len();
    if command.is_empty() || asize < PACKET_OVERHEAD + size {
        return Err(ProtocolError::BadLength);
    }

    if answer[0] != command[0] {
        warn!("Unexpected answer header.");
        return Err(ProtocolError::BadHeader);
    }

    if array::uint16_be(&answer[1..]) as usize + PACKET_OVERHEAD != asize {
        warn!("Unexpected answer size.");
        return Err(ProtocolError::BadLength);
    }

    let nparams = asize - size - PACKET_OVERHEAD;
    if command.len() < 3 + nparams || command[3..3 + nparams] != answer[3..3 + nparams] {
        warn!("Unexpected answer parameters.");
        return Err(ProtocolError::BadParameters);
    }

    let crc = answer[asize - 1];
    let ccrc = checksum::xor8(&answer[..asize - 1], 0x00);
    if crc != ccrc {
        warn!("Unexpected answer CRC.");
        return Err(ProtocolError::BadChecksum);
    }

    Ok(())
}

/// One half-duplex command/answer exchange. No retries: the first failure is
/// returned as is.
pub fn packet(
    port: &mut dyn Transport,
    cancel: &CancelToken,
    settle_ms: u64,
    command: &[u8],
    answer: &mut [u8],
    size: usize,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(DeviceError::Cancelled);
    }

    port.sleep(settle_ms);

    port.set_rts(true)?;
    debug!("send {:02X?}", command);
    if let Err(e) = write_exact(port, command) {
        warn!("Failed to send the command.");
        return Err(e);
    }
    port.set_rts(false)?;

    if let Err(e) = read_exact(port, answer) {
        warn!("Failed to receive the answer.");
        return Err(e);
    }
    debug!("recv {:02X?}", answer);

    validate_answer(command, answer, size)?;
    Ok(())
}
