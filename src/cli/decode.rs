//! Decode command implementation
//!
//! Runs one captured frame through the decoder and parser and prints what
//! the live pipeline would see.

use crate::decode::{FrameDecoder, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::feed::TickParser;
use anyhow::Context;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Captured frame (raw bytes, or hex text with --hex)
    pub file: PathBuf,

    /// The file holds a hex dump rather than raw bytes
    #[arg(long)]
    pub hex: bool,

    /// Print the decoded payload
    #[arg(long)]
    pub payload: bool,
}

impl DecodeArgs {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let raw = tokio::fs::read(&self.file)
            .await
            .with_context(|| format!("reading {}", self.file.display()))?;
        let bytes = if self.hex {
            let text = String::from_utf8(raw).context("hex dump is not UTF-8")?;
            let compact: String = text.split_whitespace().collect();
            hex::decode(compact).context("invalid hex dump")?
        } else {
            raw
        };

        let report = inspect(&bytes)?;
        println!("format:   {}", report.format);
        println!("bytes:    {} -> {}", bytes.len(), report.payload.len());
        println!("ticks:    {}", report.ticks.len());
        println!("control:  {}", report.control.join(", "));
        println!("rejected: {}", report.rejected);
        for tick in &report.ticks {
            println!("  {tick}");
        }
        if self.payload {
            println!("{}", report.payload);
        }
        Ok(())
    }
}

/// Decoded and parsed view of one frame
#[derive(Debug)]
struct Report {
    format: &'static str,
    payload: String,
    ticks: Vec<String>,
    control: Vec<String>,
    rejected: usize,
}

fn inspect(bytes: &[u8]) -> anyhow::Result<Report> {
    let decoder = FrameDecoder::new(DEFAULT_MAX_PAYLOAD_BYTES);
    let frame = decoder.decode(bytes)?;
    let parsed = TickParser::new().parse(&frame.payload)?;

    Ok(Report {
        format: frame.format.as_str(),
        ticks: parsed
            .ticks
            .iter()
            .map(|t| {
                format!(
                    "{} {} {} = {} @ {}",
                    t.league,
                    t.key(),
                    t.volume.map(|v| format!("vol {v}")).unwrap_or_default(),
                    t.value,
                    t.observed_at.to_rfc3339()
                )
            })
            .collect(),
        control: parsed.control.iter().map(|c| format!("{c:?}")).collect(),
        rejected: parsed.rejected,
        payload: frame.payload,
    })
}
