//! Shared data model for the BlueFusion BLE/HFP monitoring toolkit.
//!
//! Every other crate in the workspace depends on this one for the
//! cross-cutting types (addresses, packets) defined by the system's data
//! model; component-specific result types (inspection results, pattern
//! matches, bonds, managed connections, HFP sessions, SCO metrics) live in
//! the crate that owns that component instead, to keep this crate a leaf.

mod address;
mod packet;

pub use address::{Address, AddressError, AddressType};
pub use packet::{
    MetadataValue, Packet, PacketKind, SourceTag, Timestamp, MAX_BLE_PAYLOAD, MAX_PACKET_PAYLOAD,
};
