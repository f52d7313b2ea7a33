//! In-memory transport.
//!
//! Behaves like a single chat: every sent blob or text becomes a message with
//! a monotonically increasing id, pins stack up the way `pinChatMessage` adds
//! to a chat's pinned set (lookups see the most recent), and inbound control
//! updates are queued by the test. Each operation can be made to fail
//! so callers' best-effort paths can be exercised.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::binding::ChatBinding;
use crate::{
    ChatId, ControlChannel, ControlUpdate, ObjectHandle, ObjectTransport, PinnedMessage, Result,
    TransportError,
};

#[derive(Debug, Clone)]
enum StoredMessage {
    Document { name: String, data: Vec<u8> },
    Text(String),
}

#[derive(Debug, Default)]
struct Inner {
    last_id: i64,
    messages: BTreeMap<i64, StoredMessage>,
    /// Pinned ids, oldest first
    pinned: Vec<i64>,
    updates: VecDeque<ControlUpdate>,
    next_update_id: i64,
    replies: Vec<(ChatId, String)>,
    failures: Failures,
    counters: Counters,
}

/// Operations that can be made to fail
#[derive(Debug, Default, Clone, Copy)]
pub struct Failures {
    pub send: bool,
    pub fetch: bool,
    pub delete: bool,
    pub pin: bool,
    pub unpin: bool,
    pub pinned_lookup: bool,
    pub poll: bool,
}

/// Number of calls per operation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub sends: usize,
    pub fetches: usize,
    pub deletes: usize,
    pub pins: usize,
    pub unpins: usize,
}

pub struct MemoryTransport {
    binding: ChatBinding,
    inner: Mutex<Inner>,
}

impl MemoryTransport {
    /// A transport bound to chat `1`.
    pub fn new() -> Self {
        Self::with_binding(ChatBinding::in_memory(Some(ChatId(1))).0)
    }

    /// A transport with no chat bound.
    pub fn unbound() -> Self {
        Self::with_binding(ChatBinding::in_memory(None).0)
    }

    pub fn with_binding(binding: ChatBinding) -> Self {
        Self {
            binding,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self, message: StoredMessage) -> ObjectHandle {
        let mut inner = self.inner();
        inner.last_id += 1;
        let id = inner.last_id;
        inner.messages.insert(id, message);
        ObjectHandle(id)
    }

    /// Post a text message directly, bypassing failure injection.
    pub fn insert_text(&self, text: &str) -> ObjectHandle {
        self.store(StoredMessage::Text(text.to_string()))
    }

    /// Post a document directly, bypassing failure injection.
    pub fn insert_blob(&self, data: &[u8], name: &str) -> ObjectHandle {
        self.store(StoredMessage::Document {
            name: name.to_string(),
            data: data.to_vec(),
        })
    }

    /// Replace every pin with `handle`, or clear them all.
    pub fn set_pinned(&self, handle: Option<ObjectHandle>) {
        self.inner().pinned = handle.map(|h| h.0).into_iter().collect();
    }

    /// The most recent pin.
    pub fn pinned_handle(&self) -> Option<ObjectHandle> {
        self.inner().pinned.last().copied().map(ObjectHandle)
    }

    /// Every pinned message, oldest first.
    pub fn pinned_handles(&self) -> Vec<ObjectHandle> {
        self.inner().pinned.iter().copied().map(ObjectHandle).collect()
    }

    /// Contents of a stored document.
    pub fn blob(&self, handle: ObjectHandle) -> Option<Vec<u8>> {
        match self.inner().messages.get(&handle.0) {
            Some(StoredMessage::Document { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// File name a document was uploaded under.
    pub fn blob_name(&self, handle: ObjectHandle) -> Option<String> {
        match self.inner().messages.get(&handle.0) {
            Some(StoredMessage::Document { name, .. }) => Some(name.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.inner().messages.contains_key(&handle.0)
    }

    pub fn message_count(&self) -> usize {
        self.inner().messages.len()
    }

    pub fn set_failures(&self, failures: Failures) {
        self.inner().failures = failures;
    }

    pub fn counters(&self) -> Counters {
        self.inner().counters
    }

    /// Queue an inbound chat message for the control channel.
    pub fn push_update(&self, chat: ChatId, text: &str) {
        let mut inner = self.inner();
        inner.next_update_id += 1;
        let update_id = inner.next_update_id;
        inner.updates.push_back(ControlUpdate {
            update_id,
            chat,
            text: Some(text.to_string()),
        });
    }

    pub fn pending_updates(&self) -> usize {
        self.inner().updates.len()
    }

    /// Replies sent through the control channel, in order.
    pub fn replies(&self) -> Vec<(ChatId, String)> {
        self.inner().replies.clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn injected(op: &str) -> TransportError {
    TransportError::Io(io::Error::other(format!("injected {op} failure")))
}

impl ObjectTransport for MemoryTransport {
    fn current_chat(&self) -> Option<ChatId> {
        self.binding.current()
    }

    fn send_blob(&self, data: &[u8], name: &str) -> Result<ObjectHandle> {
        self.require_chat()?;
        {
            let mut inner = self.inner();
            inner.counters.sends += 1;
            if inner.failures.send {
                return Err(injected("send"));
            }
        }
        Ok(self.insert_blob(data, name))
    }

    fn fetch_blob(&self, handle: ObjectHandle) -> Result<Vec<u8>> {
        self.require_chat()?;
        let mut inner = self.inner();
        inner.counters.fetches += 1;
        if inner.failures.fetch {
            return Err(injected("fetch"));
        }
        match inner.messages.get(&handle.0) {
            Some(StoredMessage::Document { data, .. }) => Ok(data.clone()),
            _ => Err(TransportError::NotFound { handle }),
        }
    }

    fn delete_blob(&self, handle: ObjectHandle) -> bool {
        if self.current_chat().is_none() {
            return false;
        }
        let mut inner = self.inner();
        inner.counters.deletes += 1;
        if inner.failures.delete {
            return false;
        }
        inner.pinned.retain(|id| *id != handle.0);
        inner.messages.remove(&handle.0).is_some()
    }

    fn pin(&self, handle: ObjectHandle) -> Result<()> {
        self.require_chat()?;
        let mut inner = self.inner();
        inner.counters.pins += 1;
        if inner.failures.pin {
            return Err(injected("pin"));
        }
        if !inner.messages.contains_key(&handle.0) {
            return Err(TransportError::NotFound { handle });
        }
        inner.pinned.retain(|id| *id != handle.0);
        inner.pinned.push(handle.0);
        Ok(())
    }

    fn unpin(&self, handle: ObjectHandle) -> Result<()> {
        self.require_chat()?;
        let mut inner = self.inner();
        inner.counters.unpins += 1;
        if inner.failures.unpin {
            return Err(injected("unpin"));
        }
        inner.pinned.retain(|id| *id != handle.0);
        Ok(())
    }

    fn pinned_message(&self) -> Result<Option<PinnedMessage>> {
        self.require_chat()?;
        let inner = self.inner();
        if inner.failures.pinned_lookup {
            return Err(injected("pinned lookup"));
        }
        let Some(&id) = inner.pinned.last() else {
            return Ok(None);
        };
        let pinned = match inner.messages.get(&id) {
            Some(StoredMessage::Text(text)) => PinnedMessage {
                handle: ObjectHandle(id),
                text: Some(text.clone()),
                has_document: false,
            },
            Some(StoredMessage::Document { .. }) => PinnedMessage {
                handle: ObjectHandle(id),
                text: None,
                has_document: true,
            },
            None => return Ok(None),
        };
        Ok(Some(pinned))
    }
}

impl ControlChannel for MemoryTransport {
    fn poll_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<ControlUpdate>> {
        {
            let mut inner = self.inner();
            if inner.failures.poll {
                return Err(injected("poll"));
            }
            if let Some(offset) = offset {
                inner.updates.retain(|u| u.update_id >= offset);
            }
            if !inner.updates.is_empty() {
                return Ok(inner.updates.iter().cloned().collect());
            }
        }
        // Stand in for the long-poll wait without pinning a core.
        std::thread::sleep(timeout.min(Duration::from_millis(10)));
        Ok(Vec::new())
    }

    fn reply(&self, chat: ChatId, text: &str) -> Result<()> {
        self.inner().replies.push((chat, text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_fetch_delete() {
        let t = MemoryTransport::new();
        let h = t.send_blob(b"hello", "a.txt").unwrap();
        assert!(h.is_some());
        assert_eq!(t.fetch_blob(h).unwrap(), b"hello");
        assert_eq!(t.blob_name(h).as_deref(), Some("a.txt"));

        assert!(t.delete_blob(h));
        assert!(!t.delete_blob(h));
        assert!(matches!(
            t.fetch_blob(h),
            Err(TransportError::NotFound { .. })
        ));
    }

    #[test]
    fn test_unbound_rejects_everything() {
        let t = MemoryTransport::unbound();
        assert!(matches!(t.send_blob(b"x", "x"), Err(TransportError::Unbound)));
        assert!(matches!(t.pinned_message(), Err(TransportError::Unbound)));
        assert!(!t.delete_blob(ObjectHandle(1)));
    }

    #[test]
    fn test_pin_and_pinned_message() {
        let t = MemoryTransport::new();
        assert_eq!(t.pinned_message().unwrap(), None);

        let text = t.insert_text("{\"files\":[]}");
        t.pin(text).unwrap();
        let pinned = t.pinned_message().unwrap().unwrap();
        assert_eq!(pinned.handle, text);
        assert_eq!(pinned.text.as_deref(), Some("{\"files\":[]}"));
        assert!(!pinned.has_document);

        t.unpin(text).unwrap();
        assert_eq!(t.pinned_handle(), None);
    }

    #[test]
    fn test_pins_accumulate() {
        let t = MemoryTransport::new();
        let a = t.insert_blob(b"a", "manifest.json");
        let b = t.insert_blob(b"b", "manifest.json");
        t.pin(a).unwrap();
        t.pin(b).unwrap();

        assert_eq!(t.pinned_handles(), vec![a, b]);
        assert_eq!(t.pinned_message().unwrap().unwrap().handle, b);

        t.unpin(b).unwrap();
        assert_eq!(t.pinned_message().unwrap().unwrap().handle, a);
        assert!(t.delete_blob(a));
        assert_eq!(t.pinned_message().unwrap(), None);
    }

    #[test]
    fn test_failure_injection_and_counters() {
        let t = MemoryTransport::new();
        t.set_failures(Failures {
            send: true,
            delete: true,
            ..Failures::default()
        });
        assert!(t.send_blob(b"x", "x").is_err());
        let h = t.insert_blob(b"x", "x");
        assert!(!t.delete_blob(h));
        assert!(t.contains(h));

        let counters = t.counters();
        assert_eq!(counters.sends, 1);
        assert_eq!(counters.deletes, 1);
    }

    #[test]
    fn test_control_updates_respect_offset() {
        let t = MemoryTransport::new();
        t.push_update(ChatId(9), "/start");
        t.push_update(ChatId(9), "/id");

        let first = t.poll_updates(None, Duration::ZERO).unwrap();
        assert_eq!(first.len(), 2);

        let rest = t
            .poll_updates(Some(first[0].update_id + 1), Duration::ZERO)
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].text.as_deref(), Some("/id"));

        let none = t
            .poll_updates(Some(rest[0].update_id + 1), Duration::ZERO)
            .unwrap();
        assert!(none.is_empty());
        assert_eq!(t.pending_updates(), 0);
    }
}
