use clap::{Parser, Subcommand};

use super::constants::{ENV_HOST, ENV_PORT, ENV_TRACE_QUOTA};

#[derive(Parser)]
#[command(name = "tracelake")]
#[command(version, about = "LLM observability span engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Per-organization trace quota (root spans). Unset means unmetered.
    #[arg(long, global = true, env = ENV_TRACE_QUOTA)]
    pub trace_quota: Option<u64>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub trace_quota: Option<u64>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        trace_quota: cli.trace_quota,
    };
    (config, cli.command)
}
