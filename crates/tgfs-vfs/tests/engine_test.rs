//! Storage engine behaviour against the in-memory transport.

use std::sync::Arc;

use tgfs_config::testing::TestEnvironment;
use tgfs_manifest::{index, Manifest, ManifestEntry, ManifestStore};
use tgfs_transport::memory::Failures;
use tgfs_transport::{MemoryTransport, ObjectHandle, StateFile};
use tgfs_vfs::{FileKind, StorageEngine, VfsError};

struct Harness {
    env: TestEnvironment,
    transport: Arc<MemoryTransport>,
    engine: StorageEngine<MemoryTransport>,
}

fn harness_with(transport: MemoryTransport, serialize: bool) -> Harness {
    let env = TestEnvironment::new().unwrap();
    let transport = Arc::new(transport);
    let pointer = StateFile::new(env.state_paths().control_pointer);
    let store = ManifestStore::new(transport.clone(), pointer);
    let mut config = env.config();
    config.vfs.serialize_mutations = serialize;
    let engine = StorageEngine::new(store, &config.vfs);
    Harness {
        env,
        transport,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(MemoryTransport::new(), false)
}

impl Harness {
    fn read_all(&self, path: &str) -> Vec<u8> {
        let size = self.engine.get_attr(path).unwrap().size as usize;
        let mut buf = vec![0u8; size + 16];
        let n = self.engine.read_file(path, &mut buf, 0).unwrap();
        buf.truncate(n);
        buf
    }

    fn names(&self, dir: &str) -> Vec<String> {
        self.engine
            .list_dir(dir)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    fn fail(&self, failures: Failures) {
        self.transport.set_failures(failures);
    }
}

#[test]
fn test_file_lifecycle_scenario() {
    let h = harness();
    let fs = &h.engine;

    fs.create_file("/a.txt", 0o644).unwrap();
    let attr = fs.get_attr("/a.txt").unwrap();
    assert_eq!(attr.kind, FileKind::File);
    assert_eq!(attr.size, 0);

    assert_eq!(fs.write_file("/a.txt", b"hello", 0).unwrap(), 5);
    assert_eq!(fs.get_attr("/a.txt").unwrap().size, 5);
    assert!(h.names("/").contains(&"a.txt".to_string()));

    fs.unlink_file("/a.txt").unwrap();
    assert!(!h.names("/").contains(&"a.txt".to_string()));
}

#[test]
fn test_write_read_roundtrip() {
    let h = harness();
    h.engine.create_file("/data.bin", 0o644).unwrap();
    let payload: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
    h.engine.write_file("/data.bin", &payload, 0).unwrap();
    assert_eq!(h.read_all("/data.bin"), payload);

    let mut window = [0u8; 10];
    assert_eq!(h.engine.read_file("/data.bin", &mut window, 2995).unwrap(), 5);
    assert_eq!(&window[..5], &payload[2995..]);
    assert_eq!(h.engine.read_file("/data.bin", &mut window, 3000).unwrap(), 0);
}

#[test]
fn test_offset_gap_write_zero_fills() {
    let h = harness();
    h.engine.create_file("/gap", 0o644).unwrap();
    h.engine.write_file("/gap", b"X", 10).unwrap();

    assert_eq!(h.engine.get_attr("/gap").unwrap().size, 11);
    let data = h.read_all("/gap");
    assert!(data[..10].iter().all(|b| *b == 0));
    assert_eq!(data[10], b'X');
}

#[test]
fn test_overwrite_preserves_ctime_and_deletes_old_object() {
    let h = harness();
    let created = h.engine.create_file("/f", 0o644).unwrap();
    h.engine.write_file("/f", b"first", 0).unwrap();
    let first = h.engine.get_attr("/f").unwrap().handle;

    h.engine.write_file("/f", b"ab", 1).unwrap();
    let attr = h.engine.get_attr("/f").unwrap();
    assert_ne!(attr.handle, first);
    assert!(!h.transport.contains(first));
    assert_eq!(attr.created_at, created.created_at);
    assert_eq!(h.read_all("/f"), b"fabst");
}

#[test]
fn test_create_defers_upload() {
    let h = harness();
    h.engine.create_file("/empty", 0o644).unwrap();
    let attr = h.engine.get_attr("/empty").unwrap();
    assert_eq!(attr.handle, ObjectHandle::NONE);
    // Only the control message was uploaded.
    assert_eq!(h.transport.counters().sends, 1);

    let mut buf = [0u8; 4];
    assert_eq!(h.engine.read_file("/empty", &mut buf, 0).unwrap(), 0);
    // Two manifest loads, no content fetch.
    assert_eq!(h.transport.counters().fetches, 2);
}

#[test]
fn test_create_existing_fails() {
    let h = harness();
    h.engine.create_file("/a", 0o644).unwrap();
    assert!(matches!(
        h.engine.create_file("/a", 0o644),
        Err(VfsError::AlreadyExists(_))
    ));
    assert!(matches!(
        h.engine.create_dir("/a", 0o755),
        Err(VfsError::AlreadyExists(_))
    ));
    assert!(matches!(
        h.engine.create_dir("/", 0o755),
        Err(VfsError::AlreadyExists(_))
    ));
}

#[test]
fn test_unlink_twice() {
    let h = harness();
    h.engine.create_file("/a", 0o644).unwrap();
    h.engine.write_file("/a", b"x", 0).unwrap();
    let handle = h.engine.get_attr("/a").unwrap().handle;

    h.engine.unlink_file("/a").unwrap();
    assert!(!h.transport.contains(handle));
    assert!(matches!(
        h.engine.unlink_file("/a"),
        Err(VfsError::NotFound(_))
    ));
}

#[test]
fn test_unlink_directory_is_not_found() {
    let h = harness();
    h.engine.create_dir("/d", 0o755).unwrap();
    assert!(matches!(
        h.engine.unlink_file("/d"),
        Err(VfsError::NotFound(_))
    ));
}

#[test]
fn test_directory_emptiness() {
    let h = harness();
    h.engine.create_dir("/d", 0o755).unwrap();
    h.engine.create_file("/d/f", 0o644).unwrap();
    assert!(matches!(
        h.engine.remove_dir("/d"),
        Err(VfsError::NotEmpty(_))
    ));

    h.engine.unlink_file("/d/f").unwrap();
    h.engine.remove_dir("/d").unwrap();
    assert!(matches!(
        h.engine.get_attr("/d"),
        Err(VfsError::NotFound(_))
    ));
}

#[test]
fn test_remove_dir_errors() {
    let h = harness();
    h.engine.create_file("/file", 0o644).unwrap();
    assert!(matches!(
        h.engine.remove_dir("/file"),
        Err(VfsError::NotFound(_))
    ));
    assert!(matches!(
        h.engine.remove_dir("/missing"),
        Err(VfsError::NotFound(_))
    ));
    assert!(matches!(
        h.engine.remove_dir("/"),
        Err(VfsError::NotFound(_))
    ));
}

#[test]
fn test_rename_preserves_content() {
    let h = harness();
    h.engine.create_file("/from", 0o644).unwrap();
    h.engine.write_file("/from", b"payload", 0).unwrap();
    let before = h.read_all("/from");
    let handle = h.engine.get_attr("/from").unwrap().handle;

    h.engine.rename("/from", "/to").unwrap();
    assert_eq!(h.read_all("/to"), before);
    assert_eq!(h.engine.get_attr("/to").unwrap().handle, handle);
    assert!(matches!(
        h.engine.get_attr("/from"),
        Err(VfsError::NotFound(_))
    ));
}

#[test]
fn test_rename_errors() {
    let h = harness();
    h.engine.create_file("/a", 0o644).unwrap();
    h.engine.create_file("/b", 0o644).unwrap();
    h.engine.create_dir("/d", 0o755).unwrap();

    assert!(matches!(
        h.engine.rename("/missing", "/c"),
        Err(VfsError::NotFound(_))
    ));
    assert!(matches!(
        h.engine.rename("/a", "/b"),
        Err(VfsError::AlreadyExists(_))
    ));
    assert!(matches!(
        h.engine.rename("/d", "/d/inner"),
        Err(VfsError::Invalid(_))
    ));
    h.engine.rename("/a", "/a").unwrap();
}

#[test]
fn test_nothing_is_stored_below_a_regular_file() {
    let h = harness();
    h.engine.create_file("/a.txt", 0o644).unwrap();
    h.engine.create_file("/b", 0o644).unwrap();
    h.engine.create_dir("/d", 0o755).unwrap();
    let before = h.transport.counters().pins;

    let err = h.engine.create_file("/a.txt/b", 0o644).unwrap_err();
    assert!(matches!(err, VfsError::NotDirectory(ref p) if p == "/a.txt"));
    assert_eq!(err.errno(), libc::ENOTDIR);
    assert!(matches!(
        h.engine.create_dir("/a.txt/sub", 0o755),
        Err(VfsError::NotDirectory(_))
    ));
    assert!(matches!(
        h.engine.create_file("/a.txt/x/y", 0o644),
        Err(VfsError::NotDirectory(_))
    ));
    assert!(matches!(
        h.engine.rename("/b", "/a.txt/b"),
        Err(VfsError::NotDirectory(_))
    ));
    assert!(matches!(
        h.engine.rename("/d", "/a.txt/d"),
        Err(VfsError::NotDirectory(_))
    ));
    assert_eq!(h.transport.counters().pins, before);

    // The file stays a file, and nothing resurfaces once it is gone.
    assert_eq!(h.engine.get_attr("/a.txt").unwrap().kind, FileKind::File);
    h.engine.unlink_file("/a.txt").unwrap();
    assert!(matches!(
        h.engine.get_attr("/a.txt"),
        Err(VfsError::NotFound(_))
    ));
    assert!(h.engine.get_attr("/b").is_ok());
    assert!(h.engine.get_attr("/d").is_ok());
}

#[test]
fn test_rename_directory_moves_descendants() {
    let h = harness();
    h.engine.create_dir("/src", 0o755).unwrap();
    h.engine.create_file("/src/a", 0o644).unwrap();
    h.engine.write_file("/src/a", b"aa", 0).unwrap();
    h.engine.create_dir("/src/sub", 0o755).unwrap();
    h.engine.create_file("/src/sub/b", 0o644).unwrap();
    h.engine.create_file("/srcfile", 0o644).unwrap();

    h.engine.rename("/src", "/dst").unwrap();

    assert_eq!(h.read_all("/dst/a"), b"aa");
    assert!(h.engine.get_attr("/dst/sub/b").is_ok());
    assert!(h.engine.get_attr("/src/a").is_err());
    // A sibling sharing the name prefix is untouched.
    assert!(h.engine.get_attr("/srcfile").is_ok());
    let mut names = h.names("/");
    names.sort();
    assert_eq!(names, vec!["dst", "srcfile"]);
}

#[test]
fn test_implicit_directories() {
    let h = harness();
    let store = h.engine.store();
    let mut manifest = Manifest::new();
    manifest.push(ManifestEntry::new_file("/x/y/z.txt", 7));
    store.save(&manifest).unwrap();

    assert!(h.engine.get_attr("/x").unwrap().is_dir());
    assert_eq!(h.names("/"), vec!["x"]);
    assert_eq!(h.names("/x"), vec!["y"]);
    assert!(matches!(
        h.engine.create_file("/x", 0o644),
        Err(VfsError::AlreadyExists(_))
    ));
    assert!(matches!(
        h.engine.remove_dir("/x"),
        Err(VfsError::NotEmpty(_))
    ));

    h.engine.create_dir("/x", 0o755).unwrap();
    let loaded = store.load().unwrap();
    assert!(index::find(&loaded, "/x").unwrap().is_dir);
}

#[test]
fn test_list_dir_unknown_is_empty() {
    let h = harness();
    assert!(h.engine.list_dir("/nowhere").unwrap().is_empty());
    assert!(h.engine.list_dir("/").unwrap().is_empty());
}

#[test]
fn test_duplicate_entries_resolve_to_uploaded_copy() {
    let h = harness();
    let content = h.transport.insert_blob(b"real", "dup");
    let mut manifest = Manifest::new();
    manifest.push(ManifestEntry::new_file("/dup", 1));
    manifest.push(ManifestEntry {
        handle: content,
        size: 4,
        ..ManifestEntry::new_file("/dup", 2)
    });
    h.engine.store().save(&manifest).unwrap();

    assert_eq!(h.read_all("/dup"), b"real");
    assert_eq!(h.names("/"), vec!["dup"]);

    // Rewriting collapses the duplicates into one entry.
    h.engine.write_file("/dup", b"R", 0).unwrap();
    let loaded = h.engine.store().load().unwrap();
    assert_eq!(loaded.iter().filter(|e| e.path == "/dup").count(), 1);
    assert_eq!(h.read_all("/dup"), b"Real");
}

#[test]
fn test_directory_content_operations() {
    let h = harness();
    h.engine.create_dir("/d", 0o755).unwrap();
    let mut buf = [0u8; 4];
    assert!(matches!(
        h.engine.read_file("/d", &mut buf, 0),
        Err(VfsError::IsDirectory(_))
    ));
    assert!(matches!(
        h.engine.write_file("/d", b"x", 0),
        Err(VfsError::IsDirectory(_))
    ));
    assert!(matches!(
        h.engine.write_file("/none", b"x", 0),
        Err(VfsError::NotFound(_))
    ));
}

#[test]
fn test_truncate() {
    let h = harness();
    h.engine.create_file("/t", 0o644).unwrap();
    h.engine.write_file("/t", b"abcdef", 0).unwrap();

    assert_eq!(h.engine.truncate("/t", 3).unwrap().size, 3);
    assert_eq!(h.read_all("/t"), b"abc");

    assert_eq!(h.engine.truncate("/t", 5).unwrap().size, 5);
    assert_eq!(h.read_all("/t"), b"abc\0\0");

    let old = h.engine.get_attr("/t").unwrap().handle;
    let attr = h.engine.truncate("/t", 0).unwrap();
    assert_eq!(attr.size, 0);
    assert_eq!(attr.handle, ObjectHandle::NONE);
    assert!(!h.transport.contains(old));
}

#[test]
fn test_unbound_engine() {
    let h = harness_with(MemoryTransport::unbound(), false);
    assert!(h.engine.get_attr("/").unwrap().is_dir());
    assert!(matches!(h.engine.get_attr("/a"), Err(VfsError::Unbound)));
    let err = h.engine.create_file("/a", 0o644).unwrap_err();
    assert_eq!(err.errno(), libc::ENOTCONN);
}

#[test]
fn test_staging_is_cleaned_up_on_every_path() {
    let h = harness();
    h.engine.create_file("/s", 0o644).unwrap();
    h.engine.write_file("/s", b"content", 0).unwrap();
    h.read_all("/s");
    assert_eq!(h.env.staging_file_count(), 0);

    h.fail(Failures {
        send: true,
        ..Failures::default()
    });
    assert!(matches!(
        h.engine.write_file("/s", b"more", 7),
        Err(VfsError::Transport(_))
    ));
    assert_eq!(h.env.staging_file_count(), 0);

    h.fail(Failures {
        fetch: true,
        ..Failures::default()
    });
    let mut buf = [0u8; 4];
    assert!(h.engine.read_file("/s", &mut buf, 0).is_err());
    assert_eq!(h.env.staging_file_count(), 0);
}

#[test]
fn test_failed_delete_does_not_fail_write() {
    let h = harness();
    h.engine.create_file("/f", 0o644).unwrap();
    h.engine.write_file("/f", b"one", 0).unwrap();
    let old = h.engine.get_attr("/f").unwrap().handle;

    h.fail(Failures {
        delete: true,
        ..Failures::default()
    });
    h.engine.write_file("/f", b"two", 0).unwrap();
    assert!(h.transport.contains(old));
    assert_eq!(h.read_all("/f"), b"two");

    h.engine.unlink_file("/f").unwrap();
    assert!(h.engine.get_attr("/f").is_err());
}

#[test]
fn test_failed_save_reports_error_and_orphans_upload() {
    let h = harness();
    h.engine.create_file("/f", 0o644).unwrap();
    let before = h.transport.message_count();

    h.fail(Failures {
        pin: true,
        ..Failures::default()
    });
    let err = h.engine.write_file("/f", b"lost", 0).unwrap_err();
    assert_eq!(err.errno(), libc::EIO);

    h.fail(Failures::default());
    assert_eq!(h.transport.message_count(), before + 1);
    assert_eq!(h.engine.get_attr("/f").unwrap().size, 0);
}

#[test]
fn test_serialized_mutations_keep_every_change() {
    let h = harness_with(MemoryTransport::new(), true);
    assert!(h.engine.is_serialized());

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let engine = &h.engine;
            scope.spawn(move || {
                for i in 0..5 {
                    engine
                        .create_file(&format!("/w{worker}-{i}"), 0o644)
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(h.engine.list_dir("/").unwrap().len(), 20);
    assert_eq!(h.engine.stats().unwrap().file_count, 20);
}
