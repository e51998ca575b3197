use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Plain numbers are seconds (`1.5`); anything else is a humantime string (`250ms`, `1m`).
pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1.5)".to_string());
    }

    if let Ok(secs) = s.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).map_err(|e| {
            format!("invalid duration '{s}' ({e}; must be non-negative and in range)")
        });
    }

    humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}' ({e}; expected e.g. 10s, 250ms, 1.5)"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Aligned summary table.
    Human,
    /// One JSON object with the run summary and metrics.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "ekoload",
    author,
    version,
    about = "Load generator for framed-RPC websocket services",
    long_about = "ekoload drives virtual users against a framed-RPC websocket service.\n\nA YAML script declares the target, arrival phases and a flow of calls, pauses and loops. Each virtual user exchanges its credentials for a token, connects to `<target>/<version>?token=...`, sends its calls as `41|{\"id\",\"m\",\"p\"}` frames and disconnects.",
    after_help = "Examples:\n  ekoload run chat.yml\n  ekoload run chat.yml --duration 30s --arrivals 100\n  TARGET_URL=wss://staging ekoload run chat.yml --output json"
)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test script
    #[command(
        long_about = "Run a YAML scenario script.\n\nFlags override environment variables, which override the script's `config` section."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario script (.yml / .yaml)
    pub script: PathBuf,

    /// Websocket base URL (config.target)
    #[arg(long, env = "TARGET_URL")]
    pub target: Option<String>,

    /// Token endpoint URL (config.targetToken)
    #[arg(long, env = "TARGET_TOKEN_URL")]
    pub token_url: Option<String>,

    /// Static connection token; skips authentication
    #[arg(long, env = "TARGET_TOKEN")]
    pub token: Option<String>,

    /// Duration of the first phase (e.g. 10s, 250ms, 1.5)
    #[arg(long, env = "PHASE_DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Session count of the first phase
    #[arg(long, env = "PHASE_ARRIVAL")]
    pub arrivals: Option<u64>,

    /// Seeded into every session as `username`
    #[arg(long, env = "EKO_USERNAME")]
    pub username: Option<String>,

    /// Seeded into every session as `password`
    #[arg(long, env = "EKO_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Share one connection across all sessions
    #[arg(long)]
    pub reuse_connection: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,
}
