//! The storage engine.
//!
//! Each operation is one logical unit: load the manifest, validate, move
//! content, mutate, save. Two mutations running at once each save their own
//! copy and the later save wins, unless the engine was built with
//! `serialize_mutations`, in which case a process-wide lock is held from load
//! to save.
//!
//! Old content objects are deleted only after the manifest that stops
//! referencing them is saved, and only best-effort.

use std::sync::{Arc, Mutex, MutexGuard};

use tgfs_config::{log_vfs_debug, log_vfs_warn, VfsConfig};
use tgfs_manifest::{index, now_secs, Manifest, ManifestEntry, ManifestStats, ManifestStore};
use tgfs_transport::{ObjectHandle, ObjectTransport};

use crate::staging::StagingArea;
use crate::{DirEntry, FileAttr, Result, VfsError};

pub struct StorageEngine<T: ObjectTransport> {
    store: ManifestStore<T>,
    staging: StagingArea,
    mutations: Option<Mutex<()>>,
}

impl<T: ObjectTransport> StorageEngine<T> {
    pub fn new(store: ManifestStore<T>, config: &VfsConfig) -> Self {
        Self {
            store,
            staging: StagingArea::new(config.staging_dir.clone()),
            mutations: config.serialize_mutations.then(|| Mutex::new(())),
        }
    }

    pub fn store(&self) -> &ManifestStore<T> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<T> {
        self.store.transport()
    }

    pub fn is_serialized(&self) -> bool {
        self.mutations.is_some()
    }

    fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.mutations
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Log failures that are not ordinary filesystem answers, then hand the
    /// result back unchanged.
    fn observe<R>(&self, op: &'static str, path: &str, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            if !e.is_structural() {
                log_vfs_debug!("Operation failed", op = op, path = path, error = e.to_string());
            }
        }
        result
    }

    /// Best-effort delete of content no manifest references any more.
    fn discard(&self, handles: impl IntoIterator<Item = ObjectHandle>) {
        for handle in handles.into_iter().filter(|h| h.is_some()) {
            if !self.transport().delete_blob(handle) {
                log_vfs_warn!("Failed to delete unreferenced object", handle = handle.0);
            }
        }
    }

    /// Manifest statistics.
    pub fn stats(&self) -> Result<ManifestStats> {
        Ok(self.store.load()?.stats())
    }

    /// Attributes of `path`.
    ///
    /// The root needs no round-trip. Paths with no entry of their own but with
    /// stored paths below them are directories.
    pub fn get_attr(&self, path: &str) -> Result<FileAttr> {
        let path = index::normalize(path);
        if path == "/" {
            return Ok(FileAttr::directory(0));
        }
        let result = self.store.load().map_err(VfsError::from).and_then(|manifest| {
            attr_of(&manifest, &path).ok_or_else(|| VfsError::NotFound(path.clone()))
        });
        self.observe("getattr", &path, result)
    }

    /// Immediate children of `path`. Unknown directories list as empty.
    pub fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = index::normalize(path);
        let result = self.store.load().map_err(VfsError::from).map(|manifest| {
            index::children_of(&manifest, &path)
                .iter()
                .map(|child| DirEntry {
                    name: index::file_name(&child.path).to_string(),
                    attr: FileAttr::from(child),
                })
                .collect::<Vec<_>>()
        });
        self.observe("readdir", &path, result)
    }

    /// Create an empty regular file. Nothing is uploaded until the first
    /// non-empty write.
    pub fn create_file(&self, path: &str, _mode: u32) -> Result<FileAttr> {
        let path = index::normalize(path);
        let result = self.create_entry(ManifestEntry::new_file(&path, now_secs()), false);
        self.observe("create", &path, result)
    }

    /// Create a directory. An implicit directory is given an entry of its own.
    pub fn create_dir(&self, path: &str, _mode: u32) -> Result<FileAttr> {
        let path = index::normalize(path);
        let result = self.create_entry(ManifestEntry::new_directory(&path, now_secs()), true);
        self.observe("mkdir", &path, result)
    }

    fn create_entry(&self, entry: ManifestEntry, allow_implicit: bool) -> Result<FileAttr> {
        let _guard = self.lock();
        if entry.path == "/" {
            return Err(VfsError::AlreadyExists(entry.path));
        }
        let mut manifest = self.store.load()?;
        if index::find(&manifest, &entry.path).is_some()
            || (!allow_implicit && index::is_implicit_dir(&manifest, &entry.path))
        {
            return Err(VfsError::AlreadyExists(entry.path));
        }
        if let Some(file) = index::file_ancestor(&manifest, &entry.path) {
            return Err(VfsError::NotDirectory(file.path.clone()));
        }

        let attr = FileAttr::from(&entry);
        log_vfs_debug!("Creating entry", path = entry.path.clone(), dir = entry.is_dir);
        manifest.push(entry);
        self.store.save(&manifest)?;
        Ok(attr)
    }

    /// Read up to `buf.len()` bytes at `offset`. Returns the byte count; `0`
    /// at or past the end of the file.
    pub fn read_file(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let path = index::normalize(path);
        let result = self.read_inner(&path, buf, offset);
        self.observe("read", &path, result)
    }

    fn read_inner(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let manifest = self.store.load()?;
        let entry = file_entry(&manifest, path)?;
        if entry.handle.is_none() || offset >= entry.size || buf.is_empty() {
            return Ok(0);
        }

        let data = self.transport().fetch_blob(entry.handle)?;
        let mut staged = self.staging.stage(&data)?;
        drop(data);
        let count = staged.read_at(offset, buf)?;
        log_vfs_debug!("Read", path = path, offset = offset, count = count);
        Ok(count)
    }

    /// Write `data` at `offset` by replacing the whole object.
    ///
    /// A gap between the current end and `offset` is zero-filled. Returns the
    /// number of bytes written.
    pub fn write_file(&self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        let path = index::normalize(path);
        let result = self.write_inner(&path, data, offset);
        self.observe("write", &path, result)
    }

    fn write_inner(&self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        let _guard = self.lock();
        let mut manifest = self.store.load()?;
        let entry = file_entry(&manifest, path)?.clone();
        if data.is_empty() {
            return Ok(0);
        }

        let mut staged = self.staging.stage(&self.current_content(&entry)?)?;
        staged.write_at(offset, data)?;
        let content = staged.contents()?;
        drop(staged);

        let handle = self
            .transport()
            .send_blob(&content, index::file_name(path))?;
        let stale = self.replace(&mut manifest, &entry, handle, content.len() as u64);
        // A failed save leaves the new object unreferenced; it is not rolled back.
        self.store.save(&manifest)?;
        self.discard(stale);

        log_vfs_debug!(
            "Wrote",
            path = path,
            offset = offset,
            count = data.len(),
            size = content.len()
        );
        Ok(data.len())
    }

    /// Resize a file to `size` bytes, zero-filling on growth. Size `0` drops
    /// the stored object.
    pub fn truncate(&self, path: &str, size: u64) -> Result<FileAttr> {
        let path = index::normalize(path);
        let result = self.truncate_inner(&path, size);
        self.observe("truncate", &path, result)
    }

    fn truncate_inner(&self, path: &str, size: u64) -> Result<FileAttr> {
        let _guard = self.lock();
        let mut manifest = self.store.load()?;
        let entry = file_entry(&manifest, path)?.clone();
        if entry.content_size() == size {
            return Ok(FileAttr::from(&entry));
        }

        let handle = if size == 0 {
            ObjectHandle::NONE
        } else {
            let mut staged = self.staging.stage(&self.current_content(&entry)?)?;
            staged.set_len(size)?;
            let content = staged.contents()?;
            drop(staged);
            self.transport()
                .send_blob(&content, index::file_name(path))?
        };

        let stale = self.replace(&mut manifest, &entry, handle, size);
        self.store.save(&manifest)?;
        self.discard(stale);

        let updated = index::find(&manifest, path)
            .map(FileAttr::from)
            .ok_or_else(|| VfsError::NotFound(path.to_string()))?;
        log_vfs_debug!("Truncated", path = path, size = size);
        Ok(updated)
    }

    /// Remove a regular file.
    pub fn unlink_file(&self, path: &str) -> Result<()> {
        let path = index::normalize(path);
        let result = self.unlink_inner(&path);
        self.observe("unlink", &path, result)
    }

    fn unlink_inner(&self, path: &str) -> Result<()> {
        let _guard = self.lock();
        let mut manifest = self.store.load()?;
        match index::find(&manifest, path) {
            Some(entry) if !entry.is_dir => {}
            _ => return Err(VfsError::NotFound(path.to_string())),
        }

        let removed = manifest.remove_path(path);
        self.store.save(&manifest)?;
        self.discard(removed.into_iter().map(|e| e.handle));
        log_vfs_debug!("Unlinked", path = path);
        Ok(())
    }

    /// Remove an empty directory.
    pub fn remove_dir(&self, path: &str) -> Result<()> {
        let path = index::normalize(path);
        let result = self.remove_dir_inner(&path);
        self.observe("rmdir", &path, result)
    }

    fn remove_dir_inner(&self, path: &str) -> Result<()> {
        let _guard = self.lock();
        if path == "/" {
            return Err(VfsError::NotFound(path.to_string()));
        }
        let mut manifest = self.store.load()?;
        match index::find(&manifest, path) {
            Some(entry) if entry.is_dir => {}
            Some(_) => return Err(VfsError::NotFound(path.to_string())),
            None if index::has_descendants(&manifest, path) => {
                return Err(VfsError::NotEmpty(path.to_string()))
            }
            None => return Err(VfsError::NotFound(path.to_string())),
        }
        if index::has_descendants(&manifest, path) {
            return Err(VfsError::NotEmpty(path.to_string()));
        }

        manifest.remove_path(path);
        self.store.save(&manifest)?;
        log_vfs_debug!("Removed directory", path = path);
        Ok(())
    }

    /// Move `from` to `to`. Directories move with everything below them.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = index::normalize(from);
        let to = index::normalize(to);
        let result = self.rename_inner(&from, &to);
        self.observe("rename", &from, result)
    }

    fn rename_inner(&self, from: &str, to: &str) -> Result<()> {
        let _guard = self.lock();
        if from == "/" {
            return Err(VfsError::NotFound(from.to_string()));
        }
        if to == "/" {
            return Err(VfsError::AlreadyExists(to.to_string()));
        }
        let mut manifest = self.store.load()?;

        let source = index::find(&manifest, from).cloned();
        let implicit = source.is_none() && index::has_descendants(&manifest, from);
        if source.is_none() && !implicit {
            return Err(VfsError::NotFound(from.to_string()));
        }
        if from == to {
            return Ok(());
        }
        if index::find(&manifest, to).is_some() || index::has_descendants(&manifest, to) {
            return Err(VfsError::AlreadyExists(to.to_string()));
        }
        if let Some(file) = index::file_ancestor(&manifest, to) {
            return Err(VfsError::NotDirectory(file.path.clone()));
        }
        let is_dir = implicit || source.as_ref().is_some_and(|e| e.is_dir);
        if is_dir && index::is_descendant(to, from) {
            return Err(VfsError::Invalid(format!("cannot move {from} into itself")));
        }

        let mut stale = Vec::new();
        if let Some(source) = source {
            let removed = manifest.remove_path(from);
            stale.extend(
                removed
                    .into_iter()
                    .map(|e| e.handle)
                    .filter(|h| *h != source.handle),
            );
            manifest.push(ManifestEntry {
                path: to.to_string(),
                modified_at: now_secs(),
                ..source
            });
        }
        if is_dir {
            for entry in manifest.files.iter_mut() {
                if index::is_descendant(&entry.path, from) {
                    entry.path = format!("{}{}", to, &entry.path[from.len()..]);
                }
            }
        }

        self.store.save(&manifest)?;
        self.discard(stale);
        log_vfs_debug!("Renamed", from = from, to = to, dir = is_dir);
        Ok(())
    }

    /// Content of `entry`, or nothing if it has none uploaded.
    fn current_content(&self, entry: &ManifestEntry) -> Result<Vec<u8>> {
        if entry.handle.is_none() {
            return Ok(Vec::new());
        }
        Ok(self.transport().fetch_blob(entry.handle)?)
    }

    /// Swap `entry` for a copy pointing at `handle`, dropping any duplicates.
    /// Returns the handles no longer referenced.
    fn replace(
        &self,
        manifest: &mut Manifest,
        entry: &ManifestEntry,
        handle: ObjectHandle,
        size: u64,
    ) -> Vec<ObjectHandle> {
        let stale = manifest
            .remove_path(&entry.path)
            .into_iter()
            .map(|e| e.handle)
            .filter(|h| *h != handle)
            .collect();
        manifest.push(ManifestEntry {
            handle,
            size: if handle.is_some() { size } else { 0 },
            modified_at: now_secs(),
            ..entry.clone()
        });
        stale
    }
}

fn attr_of(manifest: &Manifest, path: &str) -> Option<FileAttr> {
    if let Some(entry) = index::find(manifest, path) {
        return Some(FileAttr::from(entry));
    }
    index::has_descendants(manifest, path).then(|| {
        let mtime = manifest
            .iter()
            .filter(|e| index::is_descendant(&e.path, path))
            .map(|e| e.modified_at)
            .max()
            .unwrap_or(0);
        FileAttr::directory(mtime)
    })
}

/// The regular-file entry at `path`.
fn file_entry<'a>(manifest: &'a Manifest, path: &str) -> Result<&'a ManifestEntry> {
    match index::find(manifest, path) {
        Some(entry) if entry.is_dir => Err(VfsError::IsDirectory(path.to_string())),
        Some(entry) => Ok(entry),
        None if index::has_descendants(manifest, path) => {
            Err(VfsError::IsDirectory(path.to_string()))
        }
        None => Err(VfsError::NotFound(path.to_string())),
    }
}
