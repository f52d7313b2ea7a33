//! # tgfs-transport
//!
//! Whole-blob transport for tgfs.
//!
//! Every blob lives as a document attached to a message in one bound chat;
//! the message id is the blob's handle. The transport only knows how to send,
//! fetch and delete whole blobs and how to pin a single control message. There
//! is no partial write, no locking and no transaction.
//!
//! ## Pieces
//!
//! - [`ObjectTransport`]: the blob contract the manifest store and engine use
//! - [`ControlChannel`]: inbound command polling for the control listener
//! - [`TelegramTransport`]: Bot API implementation of both
//! - [`MemoryTransport`]: in-process fake with failure injection
//! - [`ChatBinding`] / [`BindingPublisher`]: the single-slot chat binding
//! - [`ControlListener`]: background bind/identify command loop

pub mod binding;
pub mod listener;
pub mod memory;
pub mod telegram;

pub use binding::{BindingPublisher, ChatBinding, StateFile};
pub use listener::{ControlCommand, ControlListener, ListenerHandle};
pub use memory::MemoryTransport;
pub use telegram::TelegramTransport;

use std::fmt;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of the chat the engine is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of an uploaded blob (the remote message id).
///
/// `0` means "nothing uploaded".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectHandle(pub i64);

impl ObjectHandle {
    pub const NONE: ObjectHandle = ObjectHandle(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_some(self) -> bool {
        !self.is_none()
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The message currently pinned in the bound chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedMessage {
    pub handle: ObjectHandle,
    /// Inline text, present for text messages (the legacy manifest format)
    pub text: Option<String>,
    /// Whether the message carries a document attachment
    pub has_document: bool,
}

/// One inbound message seen by the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlUpdate {
    pub update_id: i64,
    pub chat: ChatId,
    pub text: Option<String>,
}

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no chat is bound")]
    Unbound,

    #[error("object not found: {handle}")]
    NotFound { handle: ObjectHandle },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bot API call {method} failed: {description}")]
    Api { method: String, description: String },

    #[error("Malformed API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Whole-blob storage in the bound chat.
///
/// Implementations are shared across filesystem threads, so every method
/// takes `&self`.
pub trait ObjectTransport: Send + Sync {
    /// The bound chat. Reads local state only, never the network.
    fn current_chat(&self) -> Option<ChatId>;

    /// Upload `data` as a document named `name`.
    fn send_blob(&self, data: &[u8], name: &str) -> Result<ObjectHandle>;

    /// Download the document attached to `handle`.
    fn fetch_blob(&self, handle: ObjectHandle) -> Result<Vec<u8>>;

    /// Best-effort delete. Returns whether the remote message was removed.
    fn delete_blob(&self, handle: ObjectHandle) -> bool;

    /// Pin `handle` as the chat's control message.
    fn pin(&self, handle: ObjectHandle) -> Result<()>;

    /// Unpin `handle`.
    fn unpin(&self, handle: ObjectHandle) -> Result<()>;

    /// The currently pinned message, if any.
    fn pinned_message(&self) -> Result<Option<PinnedMessage>>;

    /// The bound chat, or `Unbound`.
    fn require_chat(&self) -> Result<ChatId> {
        self.current_chat().ok_or(TransportError::Unbound)
    }
}

/// Inbound command source for the control listener
pub trait ControlChannel: Send + Sync {
    /// Fetch updates after `offset`, blocking up to `timeout`.
    fn poll_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<ControlUpdate>>;

    /// Send a plain text reply to `chat`.
    fn reply(&self, chat: ChatId, text: &str) -> Result<()>;
}
