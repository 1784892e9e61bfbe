//! Shelf CLI
//!
//! Command-line interface for Shelf - personal bookmarks with live updates.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shelf_core::Config;

mod commands;
mod editor;
mod metadata;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "shelf")]
#[command(about = "Shelf - personal bookmarks, synced live")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with the configured OAuth provider
    Login {
        /// Use an access token (or pasted redirect URL) instead of the browser flow
        #[arg(long)]
        token: Option<String>,
    },
    /// Sign out and forget the saved session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Show backend, session and feed status
    Status,
    /// List bookmarks, newest first
    #[command(alias = "ls")]
    List,
    /// Save a bookmark
    Add {
        /// URL to save (https:// is assumed when no scheme is given)
        url: String,
        /// Title (fetched from the page when omitted)
        #[arg(short = 'T', long)]
        title: Option<String>,
    },
    /// Delete a bookmark
    #[command(alias = "delete")]
    Rm {
        /// Bookmark ID
        id: String,
    },
    /// Open a bookmark in the browser
    Open {
        /// Bookmark ID
        id: String,
    },
    /// Stay connected and print changes as they arrive
    Watch,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (backend_url, api_key, table, realtime_enabled, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.clone().unwrap_or_else(Config::config_file_path);

    let config = Config::load_from_path(&config_path).context("Failed to load configuration")?;
    init_logging(&config);

    match cli.command {
        Commands::Config { command } => match command {
            Some(ConfigCommands::Show) | None => {
                commands::config::show(&config, &config_path, &output)
            }
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(config, &config_path, key, value, &output)
            }
        },
        Commands::Login { token } => commands::auth::login(&config, token, &output).await,
        Commands::Logout => commands::auth::logout(&config, &output).await,
        Commands::Whoami => commands::auth::whoami(&config, &output),
        Commands::Status => commands::status::show(&config, &output).await,
        Commands::List => commands::bookmark::list(&config, &output).await,
        Commands::Add { url, title } => commands::bookmark::add(&config, url, title, &output).await,
        Commands::Rm { id } => commands::bookmark::delete(&config, id, &output).await,
        Commands::Open { id } => commands::bookmark::open(&config, id, &output).await,
        Commands::Watch => commands::watch::run(&config, &output).await,
    }
}

/// Initialize logging
///
/// Level comes from RUST_LOG, then the `log_level` setting, then `warn`.
/// Logs go to `log_file` when set, otherwise to stderr.
fn init_logging(config: &Config) {
    let level = config.log_level.as_deref().unwrap_or("warn");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("shelf_core={},shelf_cli={}", level, level))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // Ignore errors if a subscriber is already installed
    match &config.log_file {
        Some(path) => match File::create(path) {
            Ok(file) => {
                let _ = builder.with_ansi(false).with_writer(file).try_init();
            }
            Err(e) => {
                eprintln!("Warning: Could not create log file {:?}: {}", path, e);
                let _ = builder.with_writer(std::io::stderr).try_init();
            }
        },
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
