//! Inode numbers for engine paths.
//!
//! The engine is path-addressed; the kernel speaks inodes. Numbers are handed
//! out on first sight of a path and kept for the life of the mount. Root is 1.

use std::collections::HashMap;

use tgfs_manifest::index::parent_of;

pub const ROOT_INODE: u64 = 1;

#[derive(Debug)]
pub struct InodeTable {
    paths: HashMap<u64, String>,
    inodes: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            paths: HashMap::new(),
            inodes: HashMap::new(),
            next: ROOT_INODE + 1,
        };
        table.paths.insert(ROOT_INODE, "/".to_string());
        table.inodes.insert("/".to_string(), ROOT_INODE);
        table
    }

    pub fn path(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    /// Inode for `path`, assigning one if the path is new.
    pub fn assign(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.inodes.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_string());
        self.inodes.insert(path.to_string(), ino);
        ino
    }

    /// Path of `name` inside directory `parent`.
    pub fn child_path(&self, parent: u64, name: &str) -> Option<String> {
        let dir = self.path(parent)?;
        Some(if dir == "/" {
            format!("/{name}")
        } else {
            format!("{dir}/{name}")
        })
    }

    /// Inode of the parent directory of `ino`.
    pub fn parent(&self, ino: u64) -> u64 {
        self.path(ino)
            .and_then(|path| self.inodes.get(parent_of(path)))
            .copied()
            .unwrap_or(ROOT_INODE)
    }

    /// Drop `path` and everything below it.
    pub fn forget(&mut self, path: &str) {
        let prefix = format!("{path}/");
        let gone: Vec<u64> = self
            .inodes
            .iter()
            .filter(|(p, _)| p.as_str() == path || p.starts_with(&prefix))
            .map(|(_, ino)| *ino)
            .collect();
        for ino in gone {
            if let Some(p) = self.paths.remove(&ino) {
                self.inodes.remove(&p);
            }
        }
    }

    /// Move `from` (and everything below it) to `to`, keeping inode numbers.
    pub fn rename(&mut self, from: &str, to: &str) {
        self.forget(to);
        let prefix = format!("{from}/");
        let moved: Vec<(u64, String)> = self
            .paths
            .iter()
            .filter(|(_, p)| p.as_str() == from || p.starts_with(&prefix))
            .map(|(ino, p)| (*ino, format!("{to}{}", &p[from.len()..])))
            .collect();
        for (ino, new_path) in moved {
            if let Some(old) = self.paths.insert(ino, new_path.clone()) {
                self.inodes.remove(&old);
            }
            self.inodes.insert(new_path, ino);
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_and_assignment() {
        let mut table = InodeTable::new();
        assert_eq!(table.path(ROOT_INODE), Some("/"));

        let a = table.assign("/a");
        assert_eq!(table.assign("/a"), a);
        assert_ne!(table.assign("/b"), a);
        assert_eq!(table.path(a), Some("/a"));
    }

    #[test]
    fn test_child_path_and_parent() {
        let mut table = InodeTable::new();
        assert_eq!(table.child_path(ROOT_INODE, "d").as_deref(), Some("/d"));
        let d = table.assign("/d");
        assert_eq!(table.child_path(d, "f").as_deref(), Some("/d/f"));
        assert_eq!(table.child_path(999, "f"), None);

        let f = table.assign("/d/f");
        assert_eq!(table.parent(f), d);
        assert_eq!(table.parent(d), ROOT_INODE);
    }

    #[test]
    fn test_forget_subtree() {
        let mut table = InodeTable::new();
        let d = table.assign("/d");
        table.assign("/d/f");
        let other = table.assign("/dx");

        table.forget("/d");
        assert_eq!(table.path(d), None);
        assert_eq!(table.len(), 2);
        assert_eq!(table.path(other), Some("/dx"));
    }

    #[test]
    fn test_rename_keeps_inodes() {
        let mut table = InodeTable::new();
        let d = table.assign("/d");
        let f = table.assign("/d/f");
        table.assign("/target");

        table.rename("/d", "/target");
        assert_eq!(table.path(d), Some("/target"));
        assert_eq!(table.path(f), Some("/target/f"));
        assert_eq!(table.assign("/target/f"), f);
        assert_eq!(table.len(), 3);
    }
}
