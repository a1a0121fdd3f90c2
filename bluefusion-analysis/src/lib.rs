//! Pattern, sequence, bit-pattern and entropy analysis over raw BLE
//! payloads. Every function here is pure and synchronous; callers
//! decide whether and how often to invoke them.

mod bits;
mod encoding;
mod entropy;
mod patterns;
mod sequences;

pub use bits::{bit_patterns, BitPattern};
pub use encoding::{detect_encoding, Encoding};
pub use entropy::shannon_entropy;
pub use patterns::{analyze_patterns, Pattern, PatternMatch};
pub use sequences::{detect_sequences, ArithmeticSequence};
