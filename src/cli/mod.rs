//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sibyl",
    version,
    about = "Permission-aware document search with grounded, cited answers",
    long_about = "Sibyl answers natural-language questions over a private document corpus. \
                  Hybrid semantic + keyword retrieval runs under role-based access filters, \
                  results are fused and reranked, and an LLM composes a cited answer grounded \
                  in the retrieved passages."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/sibyl/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server
    Serve,

    /// Initialize the database and seed the canonical roles
    Init,

    /// Parse, chunk, embed, and index every document in a manifest
    Ingest {
        /// Directory containing the documents and manifest.json
        #[arg(short, long)]
        documents_dir: PathBuf,

        /// Manifest path (defaults to <documents_dir>/manifest.json)
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// Ask a question as a given user, without going through HTTP
    Ask {
        /// Question to ask
        question: String,

        /// User id to search as (permissions apply)
        #[arg(short, long)]
        user: String,

        /// Restrict results to one department
        #[arg(short, long)]
        department: Option<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// Register a user with roles
    Add {
        /// User id
        id: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        department: String,

        /// Comma-separated role names (e.g. Employee,HR)
        #[arg(short, long, value_delimiter = ',')]
        roles: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the standard location)
        file: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
