//! # tgfs-vfs
//!
//! Filesystem operations for tgfs.
//!
//! Every operation loads the manifest, validates and resolves paths through
//! the index, moves whole objects through the transport, and (for mutations)
//! saves the manifest exactly once. Nothing is cached between operations.

pub mod engine;
pub mod staging;

pub use engine::StorageEngine;
pub use staging::{StagedObject, StagingArea};

use std::io;

use thiserror::Error;

use tgfs_manifest::{ManifestEntry, ManifestError};
use tgfs_transport::{ObjectHandle, TransportError};

/// Errors returned by filesystem operations
#[derive(Error, Debug)]
pub enum VfsError {
    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Invalid argument: {0}")]
    Invalid(String),

    #[error("No chat is bound")]
    Unbound,

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Staging I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    /// POSIX errno for the kernel-facing adapter.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound(_) => libc::ENOENT,
            VfsError::AlreadyExists(_) => libc::EEXIST,
            VfsError::NotEmpty(_) => libc::ENOTEMPTY,
            VfsError::NotDirectory(_) => libc::ENOTDIR,
            VfsError::IsDirectory(_) => libc::EISDIR,
            VfsError::Invalid(_) => libc::EINVAL,
            VfsError::Unbound => libc::ENOTCONN,
            VfsError::Transport(_) | VfsError::Io(_) => libc::EIO,
        }
    }

    /// Expected conditions the caller handles, as opposed to failures.
    pub fn is_structural(&self) -> bool {
        !matches!(self, VfsError::Transport(_) | VfsError::Io(_))
    }
}

impl From<TransportError> for VfsError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unbound => VfsError::Unbound,
            other => VfsError::Transport(other),
        }
    }
}

impl From<ManifestError> for VfsError {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::Transport(e) => e.into(),
            ManifestError::Io(e) => VfsError::Io(e),
            ManifestError::Json(e) => VfsError::Io(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }
}

pub type Result<T> = std::result::Result<T, VfsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// Stat-equivalent view of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    pub kind: FileKind,
    pub size: u64,
    /// Seconds since Unix epoch
    pub created_at: i64,
    /// Seconds since Unix epoch
    pub modified_at: i64,
    pub handle: ObjectHandle,
}

impl FileAttr {
    /// Attributes of a directory with no stored entry (the root or an
    /// implicit directory).
    pub fn directory(mtime: i64) -> Self {
        Self {
            kind: FileKind::Directory,
            size: 0,
            created_at: mtime,
            modified_at: mtime,
            handle: ObjectHandle::NONE,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

impl From<&ManifestEntry> for FileAttr {
    fn from(entry: &ManifestEntry) -> Self {
        Self {
            kind: if entry.is_dir {
                FileKind::Directory
            } else {
                FileKind::File
            },
            size: if entry.is_dir { 0 } else { entry.content_size() },
            created_at: entry.created_at,
            modified_at: entry.modified_at,
            handle: entry.handle,
        }
    }
}

/// One child returned by `list_dir`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub attr: FileAttr,
}
