use clap::{Parser, Subcommand};

pub mod commands;

use commands::request::{ComposeCommands, ExecuteCommands};

#[derive(Parser)]
#[command(name = "dynamics-webapi")]
#[command(about = "Compose and execute Dynamics 365 Web API requests")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the HTTP request(s) a request file composes to, without sending
    Compose(ComposeCommands),
    /// Send the request(s) in a request file and print the interpreted result
    Execute(ExecuteCommands),
}
