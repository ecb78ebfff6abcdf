//! Request file commands
//!
//! A request file holds one JSON request object, or an array of them which is
//! treated as a `$batch`.

use clap::{Args, ValueEnum};
use std::path::PathBuf;

pub mod handler;

pub use handler::{handle_compose_command, handle_execute_command};

#[derive(Args)]
pub struct ConnectionArgs {
    /// TOML configuration file; defaults to DYNAMICS_* environment variables
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Organization URL, overrides the configured one
    #[arg(long)]
    pub server_url: Option<String>,
}

#[derive(Args)]
pub struct ComposeCommands {
    /// Request file (JSON)
    pub file: PathBuf,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

#[derive(Args)]
pub struct ExecuteCommands {
    /// Request file (JSON)
    pub file: PathBuf,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Bearer token; defaults to DYNAMICS_TOKEN
    #[arg(short, long)]
    pub token: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

#[derive(Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Single-line JSON
    JsonCompact,
}
