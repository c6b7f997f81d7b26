use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chainfeed")]
#[command(about = "chainfeed - broker market-data subscriptions and option-chain cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the feed with the given configuration
    Start {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config/chainfeed.yaml")]
        config: PathBuf,

        /// Log output format; overrides `logging.format`
        #[arg(long, value_enum)]
        log_format: Option<LogFormatArg>,

        /// Override the HTTP API port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate configuration without starting the feed
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config/chainfeed.yaml")]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "chainfeed.yaml")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    /// Human-readable with colors
    Pretty,
    /// One JSON object per line
    Json,
    /// Single-line, no colors
    Compact,
}

impl LogFormatArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormatArg::Pretty => "pretty",
            LogFormatArg::Json => "json",
            LogFormatArg::Compact => "compact",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
