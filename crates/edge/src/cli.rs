//! Command-line interface for the edge binary.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "hookly-edge", about = "Hookly webhook relay edge")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the edge server (default).
    Serve,

    /// API token administration.
    #[command(subcommand)]
    Token(TokenCommand),

    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum TokenCommand {
    /// Mint a bearer token for an owner. The plaintext is printed once
    /// and only its hash is stored.
    New {
        /// Owner the token acts as.
        #[arg(long)]
        owner: String,
        /// Display name, e.g. the machine it will live on.
        #[arg(long)]
        name: String,
    },
}
