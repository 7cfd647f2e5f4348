use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lookingglass")]
#[command(version = "0.1.0")]
#[command(about = "Diagnostics core for a network looking glass", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "LOOKINGGLASS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Output format for status and check
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output_format: OutputFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the diagnostics services and run until Ctrl-C (default)
    Run,
    /// Show configured features and tool availability
    Status,
    /// Validate configuration and check for required tools
    Check,
    /// Write a default configuration file
    Init,
    /// Sample interface bandwidth and print the result as JSON
    Stats {
        /// How long to sample for
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },
    /// Show version information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    Text,
    /// JSON structured output
    Json,
}
