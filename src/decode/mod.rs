//! Frame decoding module
//!
//! Sniffs the compression of inbound binary frames (gzip, zlib or raw XML)
//! and normalizes them into UTF-8 text for the tick parser.

mod frame;

pub use frame::{
    DecodeError, DecodeStats, DecodedFrame, FrameDecoder, FrameFormat, DEFAULT_MAX_PAYLOAD_BYTES,
};
