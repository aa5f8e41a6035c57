//! CLI interface for steam-watch
//!
//! Provides subcommands for:
//! - `run`: Connect to the feed and alert on steam
//! - `decode`: Decode and parse a captured frame
//! - `config`: Show the effective configuration

mod decode;
mod run;

pub use decode::DecodeArgs;
pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "steam-watch")]
#[command(about = "Live odds feed client with steam detection and alerting")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the feed and alert on steam
    Run(RunArgs),
    /// Decode and parse a captured frame
    Decode(DecodeArgs),
    /// Show the effective configuration
    Config,
}
