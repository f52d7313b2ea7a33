//! Path index over a [`Manifest`].
//!
//! All lookups work on normalized paths. A path may be stored more than once
//! after two racing saves; resolution prefers the copy that has uploaded
//! content and otherwise takes the first one stored.

use crate::{Manifest, ManifestEntry};

/// Normalize a path to its absolute, slash-rooted form.
///
/// Empty input and `.` are the root. Repeated slashes collapse and a trailing
/// slash is dropped.
pub fn normalize(path: &str) -> String {
    if path.is_empty() || path == "." {
        return "/".to_string();
    }
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Parent directory of a normalized path. The root is its own parent.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Last segment of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Whether `path` lies strictly below `dir`.
pub fn is_descendant(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return path != "/";
    }
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// Index of the entry `path` resolves to.
pub fn position(manifest: &Manifest, path: &str) -> Option<usize> {
    let path = normalize(path);
    let mut first = None;
    for (idx, entry) in manifest.files.iter().enumerate() {
        if entry.path != path {
            continue;
        }
        if entry.handle.is_some() {
            return Some(idx);
        }
        first.get_or_insert(idx);
    }
    first
}

/// The entry stored at `path`, applying the duplicate rule.
pub fn find<'a>(manifest: &'a Manifest, path: &str) -> Option<&'a ManifestEntry> {
    position(manifest, path).map(|idx| &manifest.files[idx])
}

/// Nearest ancestor of `path` that is stored as a regular file.
///
/// Nothing may be stored below such an entry.
pub fn file_ancestor<'a>(manifest: &'a Manifest, path: &str) -> Option<&'a ManifestEntry> {
    let path = normalize(path);
    let mut dir = parent_of(&path);
    while dir != "/" {
        if let Some(entry) = find(manifest, dir).filter(|e| !e.is_dir) {
            return Some(entry);
        }
        dir = parent_of(dir);
    }
    None
}

/// Whether `path` has no entry of its own but some stored path lies below it.
pub fn is_implicit_dir(manifest: &Manifest, path: &str) -> bool {
    let path = normalize(path);
    path != "/" && find(manifest, &path).is_none() && has_descendants(manifest, &path)
}

/// Whether anything is stored below `dir`.
pub fn has_descendants(manifest: &Manifest, dir: &str) -> bool {
    let dir = normalize(dir);
    manifest.iter().any(|e| is_descendant(&e.path, &dir))
}

/// Immediate children of `dir`, in manifest order.
///
/// Each child name appears once. Deeper paths whose intermediate directory
/// has no entry of its own contribute a synthesized directory entry.
pub fn children_of(manifest: &Manifest, dir: &str) -> Vec<ManifestEntry> {
    let dir = normalize(dir);
    let mut children: Vec<ManifestEntry> = Vec::new();

    for entry in manifest.iter() {
        if !is_descendant(&entry.path, &dir) {
            continue;
        }
        let child_path = immediate_child(&dir, &entry.path);
        if children.iter().any(|c| c.path == child_path) {
            continue;
        }
        let child = find(manifest, &child_path)
            .cloned()
            .unwrap_or_else(|| ManifestEntry::new_directory(&child_path, entry.modified_at));
        children.push(child);
    }
    children
}

/// The path of the child of `dir` on the way to `path`.
fn immediate_child(dir: &str, path: &str) -> String {
    let start = if dir == "/" { 1 } else { dir.len() + 1 };
    match path[start..].find('/') {
        Some(end) => path[..start + end].to_string(),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgfs_transport::ObjectHandle;

    fn entry(path: &str, handle: i64) -> ManifestEntry {
        ManifestEntry {
            handle: ObjectHandle(handle),
            size: handle as u64,
            ..ManifestEntry::new_file(path, 0)
        }
    }

    fn manifest(entries: Vec<ManifestEntry>) -> Manifest {
        Manifest { files: entries }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("."), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("a.txt"), "/a.txt");
        assert_eq!(normalize("/a/b"), "/a/b");
        assert_eq!(normalize("a//b/"), "/a/b");
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent_of("/a"), "/");
        assert_eq!(parent_of("/a/b/c"), "/a/b");
        assert_eq!(parent_of("/"), "/");
        assert_eq!(file_name("/a/b/c.txt"), "c.txt");
        assert_eq!(file_name("/a"), "a");
    }

    #[test]
    fn test_is_descendant() {
        assert!(is_descendant("/a/b", "/a"));
        assert!(is_descendant("/a", "/"));
        assert!(!is_descendant("/ab", "/a"));
        assert!(!is_descendant("/a", "/a"));
        assert!(!is_descendant("/", "/"));
    }

    #[test]
    fn test_find_prefers_uploaded_duplicate() {
        let m = manifest(vec![entry("/f", 0), entry("/f", 12), entry("/f", 13)]);
        assert_eq!(find(&m, "/f").unwrap().handle, ObjectHandle(12));
    }

    #[test]
    fn test_find_without_uploads_takes_first() {
        let mut second = entry("/f", 0);
        second.created_at = 99;
        let m = manifest(vec![entry("/f", 0), second]);
        assert_eq!(find(&m, "f").unwrap().created_at, 0);
        assert_eq!(position(&m, "/f"), Some(0));
        assert!(find(&m, "/g").is_none());
    }

    #[test]
    fn test_children_of() {
        let m = manifest(vec![
            entry("/a.txt", 1),
            ManifestEntry::new_directory("/d", 0),
            entry("/d/f", 2),
            entry("/d/sub/g", 3),
            entry("/a.txt", 0),
        ]);

        let root: Vec<String> = children_of(&m, "/").into_iter().map(|e| e.path).collect();
        assert_eq!(root, vec!["/a.txt", "/d"]);

        let d = children_of(&m, "/d");
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].path, "/d/f");
        assert_eq!(d[1].path, "/d/sub");
        assert!(d[1].is_dir);

        assert!(children_of(&m, "/missing").is_empty());
    }

    #[test]
    fn test_file_ancestor() {
        let m = manifest(vec![
            entry("/a.txt", 1),
            ManifestEntry::new_directory("/d", 0),
            entry("/d/f", 2),
        ]);
        assert_eq!(file_ancestor(&m, "/a.txt/b").map(|e| e.path.as_str()), Some("/a.txt"));
        assert_eq!(file_ancestor(&m, "/a.txt/b/c").map(|e| e.path.as_str()), Some("/a.txt"));
        assert_eq!(file_ancestor(&m, "/d/f/g").map(|e| e.path.as_str()), Some("/d/f"));
        assert!(file_ancestor(&m, "/d/new").is_none());
        assert!(file_ancestor(&m, "/a.txt").is_none());
        assert!(file_ancestor(&m, "/x/y/z").is_none());
    }

    #[test]
    fn test_implicit_dirs() {
        let m = manifest(vec![entry("/x/y/z", 1), ManifestEntry::new_directory("/d", 0)]);
        assert!(is_implicit_dir(&m, "/x"));
        assert!(is_implicit_dir(&m, "/x/y"));
        assert!(!is_implicit_dir(&m, "/x/y/z"));
        assert!(!is_implicit_dir(&m, "/d"));
        assert!(!is_implicit_dir(&m, "/"));
        assert!(has_descendants(&m, "/x"));
        assert!(!has_descendants(&m, "/d"));
    }
}
