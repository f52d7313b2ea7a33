//! Local paths: the state directory and the mount point.
//!
//! The state directory holds two plain-text files, both advisory caches that
//! can be re-derived from the remote pinned message:
//! - `chat_id.txt`: the bound chat
//! - `metadata_message_id.txt`: the last control message this host wrote

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const CHAT_BINDING_FILE: &str = "chat_id.txt";
pub const CONTROL_POINTER_FILE: &str = "metadata_message_id.txt";

/// Expand a leading `~/` against the home directory.
pub fn expand_tilde(p: impl AsRef<Path>) -> PathBuf {
    let p = p.as_ref();
    if let Ok(stripped) = p.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    p.to_path_buf()
}

/// Resolved locations of the persisted state files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub dir: PathBuf,
    pub chat_binding: PathBuf,
    pub control_pointer: PathBuf,
}

impl StatePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            chat_binding: dir.join(CHAT_BINDING_FILE),
            control_pointer: dir.join(CONTROL_POINTER_FILE),
            dir,
        }
    }

    /// Create the state directory if missing.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state directory: {}", self.dir.display()))
    }
}

/// Resolve a mount point to its canonical absolute form.
///
/// The directory must already exist.
pub fn normalize_mount_point(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = expand_tilde(path);
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Mount point does not exist: {}", path.display()))?;
    if !canonical.is_dir() {
        anyhow::bail!("Mount point is not a directory: {}", canonical.display());
    }
    Ok(canonical)
}
