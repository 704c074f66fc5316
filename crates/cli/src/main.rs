//! memtier CLI — the main entry point.
//!
//! Commands:
//! - `init`       — Write a default config file
//! - `store`      — Store a memory entry
//! - `context`    — Assemble a context package for a query
//! - `get`        — Show one entry
//! - `summarize`  — Summarize unsummarized entries now
//! - `sweep`      — Promote or evict expired short-term entries
//! - `promote`    — Move an entry one tier up
//! - `evict`      — Evict a short-term entry
//! - `stats`      — Entry counts per tier
//! - `config`     — Show, validate or locate the configuration
//!
//! Working memory lives in process memory, so it only lasts for one
//! invocation here.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "memtier",
    about = "memtier — tiered memory and context assembly for small-window AI agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print JSON instead of human-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Agent scope to operate on
    #[arg(short, long, global = true, env = "MEMTIER_SCOPE", default_value = "default")]
    scope: String,

    /// Config file (defaults to ~/.memtier/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,

    /// Store a memory entry
    Store {
        /// Entry text
        text: String,

        /// working, short_term (default) or long_term
        #[arg(short, long)]
        tier: Option<String>,

        /// Metadata tag, repeatable
        #[arg(short, long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Assemble the context package for a query
    Context {
        /// Query the context is for
        query: String,

        /// Token budget (defaults to token_budget_default)
        #[arg(short, long)]
        budget: Option<usize>,
    },

    /// Show one entry from any tier
    Get { id: String },

    /// Summarize entries not yet covered by a summary
    Summarize,

    /// Promote or evict expired short-term entries
    Sweep,

    /// Move an entry one tier up
    Promote {
        id: String,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,
    },

    /// Evict a short-term entry, leaving a tombstone
    Evict { id: String },

    /// Entry counts per tier
    Stats,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Check the configuration for errors
    Validate,
    /// Print the default config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing. Logs go to stderr so stdout stays parseable.
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config).await?,
            ConfigAction::Validate => commands::config_cmd::validate(config).await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
        command => {
            let session = commands::Session::open(config, &cli.scope, cli.json).await?;
            match command {
                Commands::Store { text, tier, meta } => {
                    commands::memory::store(&session, text, tier.as_deref(), &meta).await?
                }
                Commands::Context { query, budget } => {
                    commands::memory::context(&session, &query, budget).await?
                }
                Commands::Get { id } => commands::memory::get(&session, &id).await?,
                Commands::Summarize => commands::memory::summarize(&session).await?,
                Commands::Sweep => commands::memory::sweep(&session).await?,
                Commands::Promote { id, from, to } => {
                    commands::memory::promote(&session, &id, &from, &to).await?
                }
                Commands::Evict { id } => commands::memory::evict(&session, &id).await?,
                Commands::Stats => commands::memory::stats(&session).await?,
                Commands::Init | Commands::Config { .. } => {}
            }
        }
    }

    Ok(())
}
