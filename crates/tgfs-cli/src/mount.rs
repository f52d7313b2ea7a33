use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tgfs_config::path::normalize_mount_point;
use tgfs_config::Config;
use tgfs_fuse::{MountSettings, TgFuse, FUSE_AVAILABLE};
use tgfs_manifest::ManifestStore;
use tgfs_transport::{ChatBinding, ControlListener, StateFile, TelegramTransport};
use tgfs_vfs::StorageEngine;

#[derive(Args, Debug)]
pub struct MountArgs {
    /// Mount point directory (must exist)
    #[arg(short = 'm', long = "mount-point", value_name = "DIR")]
    pub(crate) mount_point: PathBuf,

    /// Serialize mutating operations within this process
    #[arg(long)]
    pub(crate) serialize: bool,

    /// Stay in the foreground (always the case; accepted for compatibility)
    #[arg(short = 'f', long)]
    pub(crate) foreground: bool,

    /// Extra FUSE mount options, comma separated
    #[arg(short = 'o', value_name = "OPTIONS")]
    pub(crate) options: Vec<String>,
}

/// Execute the mount command
pub fn run(args: &MountArgs, mut config: Config) -> Result<()> {
    let mount_point = normalize_mount_point(&args.mount_point)?;
    if args.serialize {
        config.vfs.serialize_mutations = true;
    }
    if config.telegram.token.is_empty() {
        anyhow::bail!("No bot token configured: pass --token, set TGFS_BOT_TOKEN or [telegram].token");
    }
    if args.foreground {
        tracing::debug!("--foreground is implied; mount always blocks until unmounted");
    }
    if !FUSE_AVAILABLE {
        tracing::warn!("FUSE support disabled. Recompile with --features fuse to enable.");
        tracing::warn!("    cargo build -p tgfs-cli --features fuse");
    }

    let paths = config.state_paths();
    paths.ensure_dir()?;

    let (binding, publisher) = ChatBinding::load(&paths.chat_binding);
    let transport = Arc::new(
        TelegramTransport::from_config(&config.telegram, binding.clone())
            .context("Failed to create Bot API client")?,
    );
    let listener = ControlListener::new(
        transport.clone(),
        publisher,
        config.telegram.poll_timeout(),
    )
    .spawn()
    .context("Failed to start control listener")?;

    match binding.current() {
        Some(chat) => tracing::info!("  Chat:       {}", chat),
        None => tracing::info!("  Chat:       unbound (send /start to the bot)"),
    }
    tracing::info!("  State:      {}", paths.dir.display());
    tracing::info!("  Mountpoint: {}", mount_point.display());
    tracing::info!(
        "  Mutations:  {}",
        if config.vfs.serialize_mutations {
            "serialized"
        } else {
            "last writer wins"
        }
    );

    let store = ManifestStore::new(transport, StateFile::new(&paths.control_pointer));
    let engine = Arc::new(StorageEngine::new(store, &config.vfs));
    let settings = MountSettings::from_config(&config.mount, &config.vfs).with_options(&args.options);

    // Blocks until unmounted
    let result = TgFuse::new(engine, &settings).mount(&mount_point, &settings);

    tracing::info!("Stopping control listener");
    listener.shutdown();
    result
}
