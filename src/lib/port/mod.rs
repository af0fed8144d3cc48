#[cfg(target_os = "linux")]
mod linux;
#[cfg(test)]
pub(crate) mod mock;
#[cfg(not(target_os = "linux"))]
mod other;

#[cfg(target_os = "linux")]
use linux::is_port_open;
#[cfg(not(target_os = "linux"))]
use other::is_port_open;

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

use core::time::Duration;
use log::debug;
use serialport::{self, ClearBuffer, SerialPort, SerialPortType};
use std::io::{self, Read, Write};
use std::thread;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenPortError {
    #[error("no dive computer compatible ports found")]
    NoCompatiblePort,
    #[error("{port_name:?} busy")]
    PortBusy { port_name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baudrate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl LineSettings {
    /// 8 data bits, no parity, 1 stop bit, no flow control.
    pub const fn n81(baudrate: u32) -> Self {
        LineSettings {
            baudrate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }

    fn bits_per_byte(&self) -> u64 {
        let data = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 0,
            Parity::Odd | Parity::Even => 1,
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        1 + data + parity + stop
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Input,
    Output,
    Both,
}

/// Blocking byte-stream link to a dive computer.
///
/// `read` and `write` report how many bytes were transferred before the
/// configured timeout expired; a count short of the request means the device
/// stopped talking. `Err` is reserved for hard failures of the link itself.
pub trait Transport: Send {
    fn configure(&mut self, settings: &LineSettings) -> io::Result<()>;
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    fn set_break(&mut self, level: bool) -> io::Result<()>;
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;
    fn set_rts(&mut self, level: bool) -> io::Result<()>;
    fn set_halfduplex(&mut self, enable: bool) -> io::Result<()>;
    fn flush(&mut self, queue: Queue) -> io::Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn sleep(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    settings: LineSettings,
    halfduplex: bool,
}

impl SerialTransport {
    pub fn open(port_name: &str, force: bool) -> Result<Self, crate::DeviceError> {
        let port = open_port(port_name, force)?;
        let settings = LineSettings::n81(port.baud_rate()?);
        Ok(SerialTransport {
            port,
            settings,
            halfduplex: false,
        })
    }

    fn transmit_time(&self, nbytes: usize) -> Duration {
        let bits = nbytes as u64 * self.settings.bits_per_byte();
        Duration::from_micros(bits * 1_000_000 / u64::from(self.settings.baudrate.max(1)))
    }
}

impl Transport for SerialTransport {
    fn configure(&mut self, settings: &LineSettings) -> io::Result<()> {
        self.port.set_baud_rate(settings.baudrate)?;
        self.port.set_data_bits(settings.data_bits)?;
        self.port.set_parity(settings.parity)?;
        self.port.set_stop_bits(settings.stop_bits)?;
        self.port.set_flow_control(settings.flow_control)?;
        self.settings = *settings;
        debug!("configure {:?}", settings);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        Ok(self.port.set_timeout(timeout)?)
    }

    fn set_break(&mut self, level: bool) -> io::Result<()> {
        if level {
            Ok(self.port.set_break()?)
        } else {
            Ok(self.port.clear_break()?)
        }
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        Ok(self.port.write_data_terminal_ready(level)?)
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        Ok(self.port.write_request_to_send(level)?)
    }

    fn set_halfduplex(&mut self, enable: bool) -> io::Result<()> {
        self.halfduplex = enable;
        Ok(())
    }

    fn flush(&mut self, queue: Queue) -> io::Result<()> {
        let buffer = match queue {
            Queue::Input => ClearBuffer::Input,
            Queue::Output => ClearBuffer::Output,
            Queue::Both => ClearBuffer::All,
        };
        Ok(self.port.clear(buffer)?)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut nbytes = 0;
        while nbytes < buf.len() {
            match self.port.read(&mut buf[nbytes..]) {
                Ok(0) => break,
                Ok(n) => nbytes += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(nbytes)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let start = Instant::now();
        let mut nbytes = 0;
        while nbytes < buf.len() {
            match self.port.write(&buf[nbytes..]) {
                Ok(0) => break,
                Ok(n) => nbytes += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if self.halfduplex {
            // The caller flips the direction line as soon as we return, so the
            // last bit has to be on the wire by then.
            self.port.flush()?;
            let remaining = self.transmit_time(nbytes).saturating_sub(start.elapsed());
            thread::sleep(remaining);
        }

        Ok(nbytes)
    }
}

#[derive(PartialEq)]
struct UsbId(u16, u16);

static COMPATIBLE_IDS: &[UsbId] = &[
    UsbId(0x0403, 0x6001), // FTDI FT232 (Suunto, Reefnet, Oceanic interface cables)
    UsbId(0x0403, 0x6015), // FTDI FT-X series
    UsbId(0x067b, 0x2303), // Prolific PL2303
    UsbId(0x10c4, 0xea60), // Silicon Labs CP210x
];

pub fn open_port(port_name: &str, force: bool) -> Result<Box<dyn SerialPort>, crate::DeviceError> {
    let true_name: String = if port_name == "auto" {
        guess_port()?
    } else {
        port_name.to_string()
    };

    if !force && is_port_open(&true_name) {
        return Err(OpenPortError::PortBusy {
            port_name: true_name,
        }
        .into());
    }

    let port = serialport::new(&true_name, 9600).open()?;

    debug!("open_port OK: {}", &true_name);
    Ok(port)
}

fn guess_port() -> Result<String, crate::DeviceError> {
    serialport::available_ports()?
        .into_iter()
        .filter(|info| match &info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                COMPATIBLE_IDS.contains(&UsbId(usb_info.vid, usb_info.pid))
            }
            SerialPortType::Unknown
            | SerialPortType::PciPort
            | SerialPortType::BluetoothPort => false,
        })
        .map(|info| info.port_name)
        .find(|name| !is_port_open(name))
        .ok_or_else(|| OpenPortError::NoCompatiblePort.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n81_frame_is_ten_bits() {
        assert_eq!(LineSettings::n81(9600).bits_per_byte(), 10);

        let settings = LineSettings {
            parity: Parity::Even,
            stop_bits: StopBits::Two,
            ..LineSettings::n81(9600)
        };
        assert_eq!(settings.bits_per_byte(), 12);
    }
}
