//! Manifest persistence in the chat's pinned control message.
//!
//! Every `load` and `save` goes to the transport; nothing is cached. The
//! control-message pointer file is an advisory copy of the pinned message id,
//! rewritten whenever it disagrees with what is actually pinned.
//!
//! Pins accumulate in a chat and a lookup only sees the most recent one. Each
//! store serializes its own pin calls and retires whatever it pinned before,
//! so racing saves in one process leave a single control message pinned. A
//! save racing a second process can still leave the loser pinned underneath.

use std::sync::{Arc, Mutex};

use tgfs_config::{log_manifest_debug, log_manifest_warn};
use tgfs_transport::{ObjectHandle, ObjectTransport, PinnedMessage, StateFile, TransportError};

use crate::{Manifest, ManifestError, Result, CONTROL_FILE_NAME};

pub struct ManifestStore<T: ObjectTransport> {
    transport: Arc<T>,
    pointer: StateFile,
    /// Last control message this store pinned
    last_pinned: Mutex<Option<ObjectHandle>>,
}

impl<T: ObjectTransport> ManifestStore<T> {
    pub fn new(transport: Arc<T>, pointer: StateFile) -> Self {
        Self {
            transport,
            pointer,
            last_pinned: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Handle recorded in the pointer file, if any.
    pub fn pointer(&self) -> Option<ObjectHandle> {
        self.pointer.read().map(ObjectHandle)
    }

    /// Fetch and parse the current manifest.
    ///
    /// A chat with no control message yet yields an empty manifest. Transport
    /// failures, including a missing chat binding, are returned.
    pub fn load(&self) -> Result<Manifest> {
        self.transport.require_chat()?;

        match self.transport.pinned_message()? {
            Some(pinned) => {
                self.reconcile_pointer(pinned.handle);
                self.read_pinned(&pinned)
            }
            None => match self.pointer() {
                Some(handle) => {
                    log_manifest_debug!("Nothing pinned, trying pointer", handle = handle.0);
                    self.read_document(handle)
                }
                None => {
                    log_manifest_debug!("No control message, starting empty");
                    Ok(Manifest::new())
                }
            },
        }
    }

    /// Upload `manifest` as the new control message and retire the old one.
    ///
    /// The upload and the pin of the new message must succeed. Retiring the
    /// superseded message and updating the pointer file are best-effort.
    pub fn save(&self, manifest: &Manifest) -> Result<ObjectHandle> {
        self.transport.require_chat()?;
        let previous = self.current_control();
        let body = manifest.to_json()?;

        let handle = self.transport.send_blob(body.as_bytes(), CONTROL_FILE_NAME)?;
        let overtaken = match self.pin(handle) {
            Ok(overtaken) => overtaken,
            Err(e) => {
                // Unpinned, the new version is invisible; do not leave it behind.
                if !self.transport.delete_blob(handle) {
                    log_manifest_warn!(
                        "Failed to delete unpinned control message",
                        handle = handle.0
                    );
                }
                return Err(ManifestError::Transport(e));
            }
        };

        if let Err(e) = self.pointer.write(handle.0) {
            log_manifest_warn!(
                "Failed to record control message pointer",
                handle = handle.0,
                error = e.to_string()
            );
        }

        if let Some(old) = previous.filter(|old| *old != handle) {
            self.retire(old);
        }
        if let Some(old) = overtaken.filter(|old| *old != handle && Some(*old) != previous) {
            log_manifest_debug!("Retiring control message pinned by a racing save", handle = old.0);
            self.retire(old);
        }

        log_manifest_debug!(
            "Manifest saved",
            handle = handle.0,
            entries = manifest.len(),
            bytes = body.len()
        );
        Ok(handle)
    }

    /// Handle of the control message currently in effect.
    ///
    /// Prefers what is pinned; falls back to the pointer file when nothing is
    /// pinned or the lookup fails.
    pub fn current_control(&self) -> Option<ObjectHandle> {
        match self.transport.pinned_message() {
            Ok(Some(pinned)) => Some(pinned.handle),
            Ok(None) => self.pointer(),
            Err(e) => {
                log_manifest_warn!("Pinned message lookup failed", error = e.to_string());
                self.pointer()
            }
        }
    }

    fn read_pinned(&self, pinned: &PinnedMessage) -> Result<Manifest> {
        if let Some(text) = &pinned.text {
            return Ok(Manifest::parse(text));
        }
        if pinned.has_document {
            return self.read_document(pinned.handle);
        }
        log_manifest_warn!(
            "Pinned message has neither text nor document",
            handle = pinned.handle.0
        );
        Ok(Manifest::new())
    }

    fn read_document(&self, handle: ObjectHandle) -> Result<Manifest> {
        match self.transport.fetch_blob(handle) {
            Ok(bytes) => Ok(Manifest::parse(&String::from_utf8_lossy(&bytes))),
            Err(TransportError::NotFound { .. }) => {
                log_manifest_warn!("Control message is gone, starting empty", handle = handle.0);
                Ok(Manifest::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reconcile_pointer(&self, pinned: ObjectHandle) {
        if self.pointer() == Some(pinned) {
            return;
        }
        log_manifest_debug!("Updating stale control pointer", handle = pinned.0);
        if let Err(e) = self.pointer.write(pinned.0) {
            log_manifest_warn!(
                "Failed to record control message pointer",
                handle = pinned.0,
                error = e.to_string()
            );
        }
    }

    /// Pin `handle` and return the control message this store pinned before it.
    fn pin(&self, handle: ObjectHandle) -> std::result::Result<Option<ObjectHandle>, TransportError> {
        let mut last = self.last_pinned.lock().unwrap_or_else(|e| e.into_inner());
        self.transport.pin(handle)?;
        Ok(last.replace(handle))
    }

    fn retire(&self, old: ObjectHandle) {
        if let Err(e) = self.transport.unpin(old) {
            log_manifest_warn!(
                "Failed to unpin superseded control message",
                handle = old.0,
                error = e.to_string()
            );
        }
        if !self.transport.delete_blob(old) {
            log_manifest_warn!("Failed to delete superseded control message", handle = old.0);
        }
    }
}
