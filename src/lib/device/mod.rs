pub mod sensuspro;
pub mod vyper2;

use std::any::Any;
use std::fmt::Display;
use std::str::FromStr;

use log::info;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::error::{DeviceError, Result};
use crate::event::{Event, EventSink};
use crate::port::{SerialTransport, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    ReefnetSensusPro,
    SuuntoVyper2,
}

pub const FAMILIES: &[Family] = &[Family::ReefnetSensusPro, Family::SuuntoVyper2];

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::ReefnetSensusPro => "sensuspro",
            Family::SuuntoVyper2 => "vyper2",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Family::ReefnetSensusPro => "Reefnet Sensus Pro",
            Family::SuuntoVyper2 => "Suunto Vyper2",
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name().fmt(f)
    }
}

#[derive(Error, Debug)]
pub enum FamilyError {
    #[error("unknown device family '{0}'")]
    BadFamily(String),
}

impl FromStr for Family {
    type Err = FamilyError;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        FAMILIES
            .iter()
            .copied()
            .find(|family| family.name() == input)
            .ok_or_else(|| FamilyError::BadFamily(input.to_string()))
    }
}

/// Callback invoked once per dive with the dive bytes and its fingerprint.
/// Returning `false` stops the download.
pub type DiveCallback<'a> = dyn FnMut(&[u8], &[u8]) -> bool + 'a;

/// State every backend may touch while it runs: the caller's event handler and
/// the cancellation flag.
#[derive(Default)]
pub struct DeviceContext {
    pub events: EventSink,
    pub cancel: CancelToken,
}

/// Operations a device family may provide. Anything a family does not
/// implement reports [`DeviceError::Unsupported`].
pub trait Backend: Send {
    fn family(&self) -> Family;

    fn set_fingerprint(&mut self, _ctx: &mut DeviceContext, _data: &[u8]) -> Result<()> {
        Err(DeviceError::Unsupported)
    }

    fn version(&mut self, _ctx: &mut DeviceContext, _data: &mut [u8]) -> Result<()> {
        Err(DeviceError::Unsupported)
    }

    fn read(&mut self, _ctx: &mut DeviceContext, _address: u32, _data: &mut [u8]) -> Result<()> {
        Err(DeviceError::Unsupported)
    }

    fn write(&mut self, _ctx: &mut DeviceContext, _address: u32, _data: &[u8]) -> Result<()> {
        Err(DeviceError::Unsupported)
    }

    fn dump(&mut self, _ctx: &mut DeviceContext, _buffer: &mut Vec<u8>) -> Result<()> {
        Err(DeviceError::Unsupported)
    }

    fn foreach(&mut self, _ctx: &mut DeviceContext, _callback: &mut DiveCallback) -> Result<()> {
        Err(DeviceError::Unsupported)
    }

    fn close(&mut self) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// An open connection to one dive computer.
///
/// The handle owns its transport; dropping it releases the port. [`close`]
/// does the same but reports errors from the transport.
///
/// [`close`]: Device::close
pub struct Device {
    backend: Box<dyn Backend>,
    ctx: DeviceContext,
}

impl Device {
    /// Opens the serial port `port_name` (or `auto`) and sets it up for `family`.
    pub fn open(family: Family, port_name: &str, force: bool) -> Result<Device> {
        let transport = SerialTransport::open(port_name, force)?;
        let device = Device::open_transport(family, Box::new(transport))?;
        info!("opened {} on {}", family.description(), port_name);
        Ok(device)
    }

    /// Sets up `family` on an already opened transport.
    pub fn open_transport(family: Family, transport: Box<dyn Transport>) -> Result<Device> {
        let backend: Box<dyn Backend> = match family {
            Family::ReefnetSensusPro => Box::new(sensuspro::SensusPro::open(transport)?),
            Family::SuuntoVyper2 => Box::new(vyper2::Vyper2::open(transport)?),
        };
        Ok(Device {
            backend,
            ctx: DeviceContext::default(),
        })
    }

    pub fn family(&self) -> Family {
        self.backend.family()
    }

    pub fn set_events<F>(&mut self, handler: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.ctx.events.set_handler(Some(Box::new(handler)));
    }

    /// Token that aborts the running download before its next packet.
    pub fn cancel_token(&self) -> CancelToken {
        self.ctx.cancel.clone()
    }

    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.ctx.cancel = token;
    }

    /// Empty `data` clears the fingerprint so every dive is downloaded.
    pub fn set_fingerprint(&mut self, data: &[u8]) -> Result<()> {
        self.backend.set_fingerprint(&mut self.ctx, data)
    }

    pub fn version(&mut self, data: &mut [u8]) -> Result<()> {
        self.backend.version(&mut self.ctx, data)
    }

    pub fn read(&mut self, address: u32, data: &mut [u8]) -> Result<()> {
        self.backend.read(&mut self.ctx, address, data)
    }

    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.backend.write(&mut self.ctx, address, data)
    }

    /// Replaces the contents of `buffer` with the full memory image. On error
    /// `buffer` holds nothing meaningful.
    pub fn dump(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        let result = self.backend.dump(&mut self.ctx, buffer);
        if result.is_err() {
            buffer.clear();
        }
        result
    }

    /// Downloads the dives newer than the fingerprint, newest first.
    pub fn foreach<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        self.backend.foreach(&mut self.ctx, &mut callback)
    }

    pub fn close(mut self) -> Result<()> {
        self.backend.close()
    }

    /// Gives family-specific code access to its own backend. A handle of any
    /// other family is rejected with `InvalidArgument`.
    pub(crate) fn backend_mut<B: Backend + 'static>(
        &mut self,
    ) -> Result<(&mut B, &mut DeviceContext)> {
        let family = self.backend.family();
        match self.backend.as_any_mut().downcast_mut::<B>() {
            Some(backend) => Ok((backend, &mut self.ctx)),
            None => Err(DeviceError::invalid(format!(
                "operation not available for {} devices",
                family
            ))),
        }
    }

    pub(crate) fn backend<B: Backend + 'static>(&self) -> Result<&B> {
        self.backend.as_any().downcast_ref::<B>().ok_or_else(|| {
            DeviceError::invalid(format!(
                "operation not available for {} devices",
                self.backend.family()
            ))
        })
    }
}
