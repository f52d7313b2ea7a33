use std::sync::Arc;

use anyhow::{Context, Result};
use tgfs_config::Config;
use tgfs_manifest::ManifestStore;
use tgfs_transport::{ChatBinding, StateFile, TelegramTransport};

/// Execute the status command
pub fn run(config: &Config) -> Result<()> {
    let paths = config.state_paths();
    let (binding, _) = ChatBinding::load(&paths.chat_binding);
    let pointer = StateFile::new(&paths.control_pointer);

    println!("State:           {}", paths.dir.display());
    let Some(chat) = binding.current() else {
        println!("Chat:            unbound (mount and send /start to the bot)");
        return Ok(());
    };
    println!("Chat:            {}", chat);
    match pointer.read() {
        Some(id) => println!("Control pointer: {}", id),
        None => println!("Control pointer: none"),
    }

    if config.telegram.token.is_empty() {
        println!("Manifest:        unavailable (no bot token configured)");
        return Ok(());
    }

    let transport = Arc::new(
        TelegramTransport::from_config(&config.telegram, binding)
            .context("Failed to create Bot API client")?,
    );
    let store = ManifestStore::new(transport, pointer);
    match store.current_control() {
        Some(handle) => println!("Control message: {}", handle),
        None => println!("Control message: none"),
    }

    let stats = store.load().context("Failed to load manifest")?.stats();
    println!("Files:           {}", stats.file_count);
    println!("Directories:     {}", stats.dir_count);
    println!("Stored bytes:    {}", stats.total_size);
    Ok(())
}
