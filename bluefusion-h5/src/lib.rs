//! H5 three-wire UART transport framing and RTL8723D firmware bring-up.

mod firmware;
mod frame;
mod link;

pub use firmware::{
    Clock, FirmwareHeader, FirmwareImage, FirmwareLoadError, FirmwareLoader, HciLink, LoadOutcome,
    LocalVersion, RealClock, Step,
};
pub use frame::{encode_frame, Frame, FrameType, H5Transport, TransportError};
pub use link::H5Link;
