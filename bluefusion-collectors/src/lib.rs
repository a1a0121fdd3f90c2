//! Packet sources and the sniffer channel hopper.

mod ble;
mod hopper;
mod sniffer;
mod source;

pub use ble::OsBleSource;
pub use hopper::{ChannelHopper, HopperStats};
pub use sniffer::{auto_detect, Endian, HopTarget, SerialSnifferSource, SnifferWireConfig};
pub use source::{CollectorError, PacketSource};
