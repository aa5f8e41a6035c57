//! Binary frame classification and decompression

use flate2::read::{GzDecoder, ZlibDecoder};
use serde::Serialize;
use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Default cap on decompressed payload size
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

/// Leading bytes kept in diagnostics for undecodable frames
const SIGNATURE_PREVIEW_BYTES: usize = 16;

/// Wire format of an inbound frame, detected from its leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// `1F 8B`
    Gzip,
    /// `78 01`, `78 9C`, `78 DA`
    Zlib,
    /// Uncompressed XML (`<` after optional BOM/whitespace)
    Raw,
    /// Anything else
    Unknown,
}

impl FrameFormat {
    /// Classify a frame by its magic bytes
    pub fn classify(bytes: &[u8]) -> Self {
        match bytes {
            [0x1f, 0x8b, ..] => FrameFormat::Gzip,
            [0x78, 0x01 | 0x9c | 0xda, ..] => FrameFormat::Zlib,
            _ if starts_with_markup(bytes) => FrameFormat::Raw,
            _ => FrameFormat::Unknown,
        }
    }

    /// Lowercase label for logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            FrameFormat::Gzip => "gzip",
            FrameFormat::Zlib => "zlib",
            FrameFormat::Raw => "raw",
            FrameFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn starts_with_markup(bytes: &[u8]) -> bool {
    let body = bytes.strip_prefix(&[0xef, 0xbb, 0xbf]).unwrap_or(bytes);
    body.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'<')
}

/// A successfully normalized frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// UTF-8 text payload
    pub payload: String,
    /// Detected wire format
    pub format: FrameFormat,
}

/// Frame decode failures. The frame is dropped; raw bytes are kept for diagnostics.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Compressed stream was corrupt or truncated
    #[error("{format} decompression failed (signature {}): {source}", hex::encode(.signature))]
    Decompress {
        format: FrameFormat,
        signature: Vec<u8>,
        raw: Vec<u8>,
        #[source]
        source: std::io::Error,
    },
    /// Decompressed output exceeded the configured cap
    #[error("{format} payload exceeds {limit} bytes")]
    TooLarge { format: FrameFormat, limit: usize },
    /// Payload bytes were not valid UTF-8
    #[error("{format} payload is not valid UTF-8")]
    InvalidUtf8 { format: FrameFormat, raw: Vec<u8> },
    /// No known signature matched
    #[error("unrecognized frame signature {}", hex::encode(.signature))]
    UnrecognizedSignature { signature: Vec<u8>, raw: Vec<u8> },
}

impl DecodeError {
    /// Format the frame was classified as before failing
    pub fn format(&self) -> FrameFormat {
        match self {
            DecodeError::Decompress { format, .. }
            | DecodeError::TooLarge { format, .. }
            | DecodeError::InvalidUtf8 { format, .. } => *format,
            DecodeError::UnrecognizedSignature { .. } => FrameFormat::Unknown,
        }
    }

    /// Hex dump of the frame's leading bytes
    pub fn hex_preview(&self) -> String {
        match self {
            DecodeError::Decompress { raw, .. }
            | DecodeError::InvalidUtf8 { raw, .. }
            | DecodeError::UnrecognizedSignature { raw, .. } => {
                hex::encode(&raw[..raw.len().min(SIGNATURE_PREVIEW_BYTES)])
            }
            DecodeError::TooLarge { .. } => String::new(),
        }
    }
}

/// Per-format frame counters
#[derive(Debug, Default)]
struct FrameCounters {
    gzip: AtomicU64,
    zlib: AtomicU64,
    raw: AtomicU64,
    unknown: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of decoder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub gzip: u64,
    pub zlib: u64,
    pub raw: u64,
    pub unknown: u64,
    pub failed: u64,
}

/// Classifies and decompresses raw inbound frames into text payloads
#[derive(Debug)]
pub struct FrameDecoder {
    max_payload_bytes: usize,
    counters: FrameCounters,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_BYTES)
    }
}

impl FrameDecoder {
    /// Create a decoder with the given decompressed size cap
    pub fn new(max_payload_bytes: usize) -> Self {
        Self {
            max_payload_bytes,
            counters: FrameCounters::default(),
        }
    }

    /// Decode one frame. Each frame is independent; failures are never retried.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedFrame, DecodeError> {
        let format = FrameFormat::classify(bytes);
        self.count_format(format);
        metrics::counter!("steamwatch_frames_total", "format" => format.as_str()).increment(1);

        let result = match format {
            FrameFormat::Gzip => self.inflate(format, GzDecoder::new(bytes), bytes),
            FrameFormat::Zlib => self.inflate(format, ZlibDecoder::new(bytes), bytes),
            FrameFormat::Raw => self.utf8(format, bytes.to_vec()),
            FrameFormat::Unknown => Err(DecodeError::UnrecognizedSignature {
                signature: signature(bytes),
                raw: bytes.to_vec(),
            }),
        };

        if result.is_err() {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Current counter values
    pub fn stats(&self) -> DecodeStats {
        DecodeStats {
            gzip: self.counters.gzip.load(Ordering::Relaxed),
            zlib: self.counters.zlib.load(Ordering::Relaxed),
            raw: self.counters.raw.load(Ordering::Relaxed),
            unknown: self.counters.unknown.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn inflate(
        &self,
        format: FrameFormat,
        decoder: impl Read,
        raw: &[u8],
    ) -> Result<DecodedFrame, DecodeError> {
        // One byte past the cap tells "exactly at limit" from "over limit"
        let mut limited = decoder.take(self.max_payload_bytes as u64 + 1);
        let mut out = Vec::new();
        limited
            .read_to_end(&mut out)
            .map_err(|source| DecodeError::Decompress {
                format,
                signature: signature(raw),
                raw: raw.to_vec(),
                source,
            })?;

        if out.len() > self.max_payload_bytes {
            return Err(DecodeError::TooLarge {
                format,
                limit: self.max_payload_bytes,
            });
        }
        self.utf8(format, out)
    }

    fn utf8(&self, format: FrameFormat, bytes: Vec<u8>) -> Result<DecodedFrame, DecodeError> {
        if bytes.len() > self.max_payload_bytes {
            return Err(DecodeError::TooLarge {
                format,
                limit: self.max_payload_bytes,
            });
        }
        String::from_utf8(bytes)
            .map(|payload| DecodedFrame { payload, format })
            .map_err(|e| DecodeError::InvalidUtf8 {
                format,
                raw: e.into_bytes(),
            })
    }

    fn count_format(&self, format: FrameFormat) {
        let counter = match format {
            FrameFormat::Gzip => &self.counters.gzip,
            FrameFormat::Zlib => &self.counters.zlib,
            FrameFormat::Raw => &self.counters.raw,
            FrameFormat::Unknown => &self.counters.unknown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn signature(bytes: &[u8]) -> Vec<u8> {
    bytes[..bytes.len().min(2)].to_vec()
}
