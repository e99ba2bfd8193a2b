use clap::{Parser, Subcommand};

/// imgvault - minimal bearer-token image hosting API
#[derive(Parser)]
#[command(name = "imgvault", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Port to bind (overrides IMGVAULT_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage upload tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Create a new upload token
    Create {
        /// Display name, up to 50 characters
        #[arg(long)]
        name: Option<String>,
        /// Validity in seconds (default 30 days, max 365 days)
        #[arg(long)]
        lifetime: Option<i64>,
    },
    /// List all tokens
    List,
    /// Delete a token and every image it owns
    Delete {
        #[arg(long)]
        id: String,
    },
}
