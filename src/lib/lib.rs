pub mod array;
pub mod cancel;
pub mod checksum;
pub mod device;
pub mod error;
pub mod event;
pub mod extract;
pub mod port;
pub mod protocol;
pub mod sample;

pub use cancel::CancelToken;
pub use device::{Device, Family};
pub use error::{DeviceError, ProtocolError, Result};
pub use event::Event;
