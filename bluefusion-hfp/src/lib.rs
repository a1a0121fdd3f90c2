//! HFP AT-command flow tracking, feature negotiation and failure analysis.

mod analyzer;
mod features;
mod session;

pub use analyzer::{analyze, FailureReport, TraceEntry};
pub use features::{AgFeatures, Codec, HfFeatures};
pub use session::{AtCommand, CallState, Direction, Event, HfpSession, Indicator, Role, State};
