//! # tgfs CLI
//!
//! Command-line interface for tgfs, a filesystem stored in a Telegram chat.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tgfs_config::logging::{init_logging, LogLevel};
use tgfs_config::Config;

mod mount;
mod status;

/// tgfs - a filesystem whose files live as documents in a Telegram chat
#[derive(Parser)]
#[command(name = "tgfs")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Verbose (debug) logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Bot API token
    #[arg(long, global = true, env = "TGFS_BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Directory holding chat_id.txt and metadata_message_id.txt
    #[arg(long, global = true, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the chat's filesystem and serve until unmounted
    Mount(mount::MountArgs),

    /// Show chat binding, control message and manifest statistics
    Status,

    /// Print configuration as TOML
    Config {
        /// Print the effective configuration instead of the defaults
        #[arg(long)]
        effective: bool,
    },
}

impl Cli {
    /// Load configuration and apply command-line overrides on top.
    fn config(&self) -> Result<Config> {
        let mut config = Config::load().context("Failed to load configuration")?;
        if let Some(token) = &self.token {
            config.telegram.token = token.clone();
        }
        if let Some(dir) = &self.state_dir {
            config.state.dir = dir.clone();
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();
    init_logging(if cli.debug {
        LogLevel::Debug
    } else {
        LogLevel::Info
    });

    match &cli.command {
        Commands::Mount(args) => mount::run(args, cli.config()?),
        Commands::Status => status::run(&cli.config()?),
        Commands::Config { effective } => {
            if *effective {
                let mut config = cli.config()?;
                if !config.telegram.token.is_empty() {
                    config.telegram.token = "<redacted>".to_string();
                }
                print!("{}", toml::to_string_pretty(&config)?);
            } else {
                print!("{}", Config::default_toml());
            }
            Ok(())
        }
    }
}
