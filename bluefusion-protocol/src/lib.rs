//! ATT/GATT parser registry and the packet inspector built on top of it.

mod inspector;
mod parser;

pub use inspector::{classify_protocol, hex_dump, InspectionResult, InspectorStats, PacketInspector, SecurityFlags};
pub use parser::{AttParser, ParseError, ParsedFields, ParsedValue, ParserRegistry, ProtocolParser};
