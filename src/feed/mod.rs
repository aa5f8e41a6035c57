//! Tick feed module
//!
//! Typed market ticks and the parser turning normalized XML payloads into them.

mod parser;
mod types;

pub use parser::{renew_request, ParseError, TickParser};
pub use types::{ControlMessage, MarketKind, ParsedPayload, Tick, TickKey};
