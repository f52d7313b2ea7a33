//! Chat binding: a single-slot value owned by the control listener.
//!
//! The listener holds the only [`BindingPublisher`]; transports hold
//! [`ChatBinding`] readers. Publishing persists the value to the state file
//! first and only then makes it visible, so a failed write never leaves the
//! process bound to a chat it could not record.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::ChatId;

/// A plain-text file holding one integer.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored value. Missing, empty, unparsable or zero means absent.
    pub fn read(&self) -> Option<i64> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match raw.trim().parse::<i64>() {
            Ok(0) | Err(_) => None,
            Ok(v) => Some(v),
        }
    }

    pub fn write(&self, value: i64) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, value.to_string())
    }
}

type Slot = Arc<RwLock<Option<ChatId>>>;

/// Read side of the chat binding
#[derive(Debug, Clone)]
pub struct ChatBinding {
    slot: Slot,
}

/// Write side of the chat binding, held by the control listener
#[derive(Debug)]
pub struct BindingPublisher {
    slot: Slot,
    file: Option<StateFile>,
}

impl ChatBinding {
    /// Load the persisted binding from `path` and split into reader and writer.
    pub fn load(path: impl Into<PathBuf>) -> (ChatBinding, BindingPublisher) {
        let file = StateFile::new(path);
        let initial = file.read().map(ChatId);
        let slot: Slot = Arc::new(RwLock::new(initial));
        (
            ChatBinding { slot: slot.clone() },
            BindingPublisher {
                slot,
                file: Some(file),
            },
        )
    }

    /// An in-memory binding with no backing file.
    pub fn in_memory(initial: Option<ChatId>) -> (ChatBinding, BindingPublisher) {
        let slot: Slot = Arc::new(RwLock::new(initial));
        (
            ChatBinding { slot: slot.clone() },
            BindingPublisher { slot, file: None },
        )
    }

    pub fn current(&self) -> Option<ChatId> {
        *self.slot.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl BindingPublisher {
    /// Persist and publish a new binding.
    pub fn publish(&self, chat: ChatId) -> io::Result<()> {
        if let Some(file) = &self.file {
            file.write(chat.0)?;
        }
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(chat);
        Ok(())
    }

    /// A reader sharing this publisher's slot.
    pub fn reader(&self) -> ChatBinding {
        ChatBinding {
            slot: self.slot.clone(),
        }
    }
}
