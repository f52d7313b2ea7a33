//! # tgfs-fuse
//!
//! FUSE adapter for the tgfs storage engine.
//!
//! Translates kernel requests into engine calls:
//! - Inodes are assigned per path on first lookup (see [`inodes`]).
//! - Every request goes to the engine; nothing is cached beyond the
//!   attribute TTL handed to the kernel.
//! - Engine errors are answered with their errno.

pub mod inodes;

use std::time::Duration;

use tgfs_config::{MountConfig, VfsConfig};

/// Options for one mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSettings {
    pub fs_name: String,
    pub auto_unmount: bool,
    pub allow_other: bool,
    pub attr_ttl: Duration,
    /// Raw `-o` options passed through to FUSE
    pub extra: Vec<String>,
}

impl MountSettings {
    pub fn from_config(mount: &MountConfig, vfs: &VfsConfig) -> Self {
        Self {
            fs_name: mount.fs_name.clone(),
            auto_unmount: mount.auto_unmount,
            allow_other: mount.allow_other,
            attr_ttl: Duration::from_secs(vfs.attr_ttl_secs),
            extra: Vec::new(),
        }
    }

    /// Add `-o a,b,c` style options.
    pub fn with_options<S: AsRef<str>>(mut self, raw: &[S]) -> Self {
        for group in raw {
            self.extra.extend(
                group
                    .as_ref()
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
        self
    }
}

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod imp {
    use std::ffi::OsStr;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    use fuser::{
        FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
        ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
    };
    use libc::{c_int, EINVAL, ENOENT};
    use tgfs_config::log_fuse_debug;
    use tgfs_transport::ObjectTransport;
    use tgfs_vfs::{FileAttr, StorageEngine, VfsError};

    use crate::inodes::{InodeTable, ROOT_INODE};
    use crate::MountSettings;

    const BLOCK_SIZE: u64 = 4096;

    pub struct TgFuse<T: ObjectTransport> {
        engine: Arc<StorageEngine<T>>,
        inodes: InodeTable,
        ttl: Duration,
    }

    impl<T: ObjectTransport + 'static> TgFuse<T> {
        pub fn new(engine: Arc<StorageEngine<T>>, settings: &MountSettings) -> Self {
            Self {
                engine,
                inodes: InodeTable::new(),
                ttl: settings.attr_ttl,
            }
        }

        /// Mount at `mountpoint` and serve until unmounted (Ref: <https://docs.rs/fuser>)
        pub fn mount(self, mountpoint: &Path, settings: &MountSettings) -> anyhow::Result<()> {
            let options = mount_options(settings);
            fuser::mount2(self, mountpoint, &options)?;
            Ok(())
        }

        fn to_attr(&self, ino: u64, attr: &FileAttr, req: &Request<'_>) -> fuser::FileAttr {
            let mtime = UNIX_EPOCH + Duration::from_secs(attr.modified_at.max(0) as u64);
            let ctime = UNIX_EPOCH + Duration::from_secs(attr.created_at.max(0) as u64);
            let (kind, perm, nlink) = if attr.is_dir() {
                (FileType::Directory, 0o755, 2)
            } else {
                (FileType::RegularFile, 0o644, 1)
            };
            fuser::FileAttr {
                ino,
                size: attr.size,
                blocks: attr.size.div_ceil(BLOCK_SIZE),
                atime: mtime,
                mtime,
                ctime: mtime,
                crtime: ctime,
                kind,
                perm,
                nlink,
                uid: req.uid(),
                gid: req.gid(),
                rdev: 0,
                flags: 0,
                blksize: BLOCK_SIZE as u32,
            }
        }

        fn child(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
            let name = name.to_str().ok_or(ENOENT)?;
            self.inodes.child_path(parent, name).ok_or(ENOENT)
        }

        fn path(&self, ino: u64) -> Result<String, c_int> {
            self.inodes.path(ino).map(str::to_string).ok_or(ENOENT)
        }

        fn reply_entry(&mut self, req: &Request<'_>, path: &str, attr: &FileAttr, reply: ReplyEntry) {
            let ino = self.inodes.assign(path);
            let attr = self.to_attr(ino, attr, req);
            reply.entry(&self.ttl, &attr, 0);
        }
    }

    fn errno(op: &'static str, path: &str, e: VfsError) -> c_int {
        log_fuse_debug!("Request failed", op = op, path = path, error = e.to_string());
        e.errno()
    }

    fn mount_options(settings: &MountSettings) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::RW,
            MountOption::FSName(settings.fs_name.clone()),
            MountOption::Subtype("tgfs".to_string()),
        ];
        if settings.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        if settings.allow_other {
            options.push(MountOption::AllowOther);
        }
        options.extend(settings.extra.iter().map(|o| parse_option(o)));
        options
    }

    fn parse_option(raw: &str) -> MountOption {
        match raw {
            "ro" => MountOption::RO,
            "rw" => MountOption::RW,
            "allow_other" => MountOption::AllowOther,
            "allow_root" => MountOption::AllowRoot,
            "auto_unmount" => MountOption::AutoUnmount,
            "default_permissions" => MountOption::DefaultPermissions,
            "dev" => MountOption::Dev,
            "nodev" => MountOption::NoDev,
            "suid" => MountOption::Suid,
            "nosuid" => MountOption::NoSuid,
            "exec" => MountOption::Exec,
            "noexec" => MountOption::NoExec,
            "atime" => MountOption::Atime,
            "noatime" => MountOption::NoAtime,
            "sync" => MountOption::Sync,
            "async" => MountOption::Async,
            other => MountOption::CUSTOM(other.to_string()),
        }
    }

    impl<T: ObjectTransport + 'static> Filesystem for TgFuse<T> {
        fn lookup(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
            let path = match self.child(parent, name) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            match self.engine.get_attr(&path) {
                Ok(attr) => self.reply_entry(req, &path, &attr, reply),
                Err(e) => reply.error(errno("lookup", &path, e)),
            }
        }

        fn getattr(&mut self, req: &Request, ino: u64, reply: ReplyAttr) {
            let path = match self.path(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            match self.engine.get_attr(&path) {
                Ok(attr) => reply.attr(&self.ttl, &self.to_attr(ino, &attr, req)),
                Err(e) => reply.error(errno("getattr", &path, e)),
            }
        }

        fn setattr(
            &mut self,
            req: &Request<'_>,
            ino: u64,
            _mode: Option<u32>,
            _uid: Option<u32>,
            _gid: Option<u32>,
            size: Option<u64>,
            _atime: Option<TimeOrNow>,
            _mtime: Option<TimeOrNow>,
            _ctime: Option<std::time::SystemTime>,
            _fh: Option<u64>,
            _crtime: Option<std::time::SystemTime>,
            _chgtime: Option<std::time::SystemTime>,
            _bkuptime: Option<std::time::SystemTime>,
            _flags: Option<u32>,
            reply: ReplyAttr,
        ) {
            let path = match self.path(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            let result = match size {
                Some(size) => self.engine.truncate(&path, size),
                None => self.engine.get_attr(&path),
            };
            match result {
                Ok(attr) => reply.attr(&self.ttl, &self.to_attr(ino, &attr, req)),
                Err(e) => reply.error(errno("setattr", &path, e)),
            }
        }

        fn readdir(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            mut reply: ReplyDirectory,
        ) {
            let path = match self.path(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            let children = match self.engine.list_dir(&path) {
                Ok(c) => c,
                Err(e) => return reply.error(errno("readdir", &path, e)),
            };

            let mut entries = vec![
                (ino, FileType::Directory, ".".to_string()),
                (self.inodes.parent(ino), FileType::Directory, "..".to_string()),
            ];
            for child in children {
                let Some(child_path) = self.inodes.child_path(ino, &child.name) else {
                    continue;
                };
                let kind = if child.attr.is_dir() {
                    FileType::Directory
                } else {
                    FileType::RegularFile
                };
                entries.push((self.inodes.assign(&child_path), kind, child.name));
            }

            // Offset of an entry is its position + 1; the kernel resumes after it.
            for (i, (child_ino, kind, name)) in
                entries.iter().enumerate().skip(offset.max(0) as usize)
            {
                if reply.add(*child_ino, (i + 1) as i64, *kind, name) {
                    break;
                }
            }
            reply.ok();
        }

        fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
            if ino != ROOT_INODE && self.inodes.path(ino).is_none() {
                return reply.error(ENOENT);
            }
            reply.opened(0, 0);
        }

        fn read(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            size: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: ReplyData,
        ) {
            let path = match self.path(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            if offset < 0 {
                return reply.error(EINVAL);
            }
            let mut buf = vec![0u8; size as usize];
            match self.engine.read_file(&path, &mut buf, offset as u64) {
                Ok(n) => reply.data(&buf[..n]),
                Err(e) => reply.error(errno("read", &path, e)),
            }
        }

        fn write(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            data: &[u8],
            _write_flags: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: ReplyWrite,
        ) {
            let path = match self.path(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            if offset < 0 {
                return reply.error(EINVAL);
            }
            match self.engine.write_file(&path, data, offset as u64) {
                Ok(n) => reply.written(n as u32),
                Err(e) => reply.error(errno("write", &path, e)),
            }
        }

        fn create(
            &mut self,
            req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            _umask: u32,
            _flags: i32,
            reply: ReplyCreate,
        ) {
            let path = match self.child(parent, name) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            match self.engine.create_file(&path, mode) {
                Ok(attr) => {
                    let ino = self.inodes.assign(&path);
                    reply.created(&self.ttl, &self.to_attr(ino, &attr, req), 0, 0, 0);
                }
                Err(e) => reply.error(errno("create", &path, e)),
            }
        }

        fn mknod(
            &mut self,
            req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            _umask: u32,
            _rdev: u32,
            reply: ReplyEntry,
        ) {
            if mode & libc::S_IFMT != libc::S_IFREG {
                return reply.error(libc::EPERM);
            }
            let path = match self.child(parent, name) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            match self.engine.create_file(&path, mode) {
                Ok(attr) => self.reply_entry(req, &path, &attr, reply),
                Err(e) => reply.error(errno("mknod", &path, e)),
            }
        }

        fn mkdir(
            &mut self,
            req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            _umask: u32,
            reply: ReplyEntry,
        ) {
            let path = match self.child(parent, name) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            match self.engine.create_dir(&path, mode) {
                Ok(attr) => self.reply_entry(req, &path, &attr, reply),
                Err(e) => reply.error(errno("mkdir", &path, e)),
            }
        }

        fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
            let path = match self.child(parent, name) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            match self.engine.unlink_file(&path) {
                Ok(()) => {
                    self.inodes.forget(&path);
                    reply.ok();
                }
                Err(e) => reply.error(errno("unlink", &path, e)),
            }
        }

        fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
            let path = match self.child(parent, name) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            match self.engine.remove_dir(&path) {
                Ok(()) => {
                    self.inodes.forget(&path);
                    reply.ok();
                }
                Err(e) => reply.error(errno("rmdir", &path, e)),
            }
        }

        fn rename(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            newparent: u64,
            newname: &OsStr,
            _flags: u32,
            reply: ReplyEmpty,
        ) {
            let (from, to) = match (self.child(parent, name), self.child(newparent, newname)) {
                (Ok(from), Ok(to)) => (from, to),
                (Err(e), _) | (_, Err(e)) => return reply.error(e),
            };
            match self.engine.rename(&from, &to) {
                Ok(()) => {
                    self.inodes.rename(&from, &to);
                    reply.ok();
                }
                Err(e) => reply.error(errno("rename", &from, e)),
            }
        }
    }
}

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
mod imp {
    use std::path::Path;
    use std::sync::Arc;

    use tgfs_transport::ObjectTransport;
    use tgfs_vfs::StorageEngine;

    use crate::MountSettings;

    /// Placeholder for non-Linux or non-feature builds
    pub struct TgFuse<T: ObjectTransport> {
        _engine: Arc<StorageEngine<T>>,
    }

    impl<T: ObjectTransport + 'static> TgFuse<T> {
        pub fn new(engine: Arc<StorageEngine<T>>, _settings: &MountSettings) -> Self {
            Self { _engine: engine }
        }

        pub fn mount(self, _mountpoint: &Path, _settings: &MountSettings) -> anyhow::Result<()> {
            #[cfg(not(target_os = "linux"))]
            anyhow::bail!(
                "FUSE support is only available on Linux (current: {})",
                std::env::consts::OS
            );
            #[cfg(target_os = "linux")]
            anyhow::bail!("tgfs was built without FUSE support; rebuild with --features fuse");
        }
    }
}

pub use imp::TgFuse;

/// Whether this build can actually mount.
pub const FUSE_AVAILABLE: bool = cfg!(all(feature = "fuse", target_os = "linux"));
