use std::fs;

use tempfile::TempDir;
use unionfs::{DiskLayer, ErrorKind, Layer, SerializingWrapper, UnionEngine, UnionEngineBuilder};

fn engine(
    readable: &TempDir,
    writable: &TempDir,
) -> SerializingWrapper<UnionEngine<DiskLayer, DiskLayer>> {
    let readable = DiskLayer::new(readable.path(), true);
    let writable = DiskLayer::new(writable.path(), false);
    SerializingWrapper::new(UnionEngine::new(writable, readable).unwrap())
}

#[tokio::test]
async fn copy_up_on_chmod() {
    let readable = tempfile::tempdir().unwrap();
    let writable = tempfile::tempdir().unwrap();
    fs::write(readable.path().join("f"), b"hello").unwrap();

    let engine = engine(&readable, &writable);
    engine.inner().initialize().await.unwrap();

    engine.chmod("/f", 0o600).await.unwrap();

    assert!(writable.path().join("f").exists());
    let meta = fs::metadata(writable.path().join("f")).unwrap();
    use std::os::unix::fs::PermissionsExt;
    assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    assert_eq!(fs::read(writable.path().join("f")).unwrap(), b"hello");
}

#[tokio::test]
async fn whiteout_survives_restart() {
    let readable = tempfile::tempdir().unwrap();
    let writable = tempfile::tempdir().unwrap();
    fs::write(readable.path().join("x"), b"data").unwrap();

    {
        let engine = engine(&readable, &writable);
        engine.inner().initialize().await.unwrap();
        engine.unlink("/x").await.unwrap();
    }

    let log_contents = fs::read_to_string(writable.path().join(".deletedFiles.log")).unwrap();
    assert!(log_contents.lines().any(|line| line == "d/x"));

    let engine = engine(&readable, &writable);
    engine.inner().initialize().await.unwrap();
    assert!(!engine.exists("/x").await);
}

#[tokio::test]
async fn rename_across_layers() {
    let readable = tempfile::tempdir().unwrap();
    let writable = tempfile::tempdir().unwrap();
    fs::create_dir(readable.path().join("src")).unwrap();
    fs::write(readable.path().join("src/f1"), b"one").unwrap();
    fs::write(readable.path().join("src/f2"), b"two").unwrap();

    let engine = engine(&readable, &writable);
    engine.inner().initialize().await.unwrap();

    engine.rename("/src", "/dst").await.unwrap();

    assert!(engine.exists("/dst/f1").await);
    assert!(engine.exists("/dst/f2").await);
    assert!(!engine.exists("/src").await);

    let log_contents = fs::read_to_string(writable.path().join(".deletedFiles.log")).unwrap();
    for expected in ["d/src/f1", "d/src/f2", "d/src"] {
        assert!(
            log_contents.lines().any(|line| line == expected),
            "missing whiteout record {}",
            expected
        );
    }
}

#[tokio::test]
async fn overlay_file_flush_writes_back_only_when_dirty() {
    let readable = tempfile::tempdir().unwrap();
    let writable = tempfile::tempdir().unwrap();
    fs::write(readable.path().join("note.txt"), b"hi").unwrap();

    let engine = engine(&readable, &writable);
    engine.inner().initialize().await.unwrap();

    let content = engine.read_file("/note.txt").await.unwrap();
    assert_eq!(content, b"hi");
    assert!(!writable.path().join("note.txt").exists());

    engine.write_file("/note.txt", b"hi there", 0o644).await.unwrap();
    assert!(writable.path().join("note.txt").exists());
    assert_eq!(fs::read(writable.path().join("note.txt")).unwrap(), b"hi there");
}

#[tokio::test]
async fn readdir_merges_with_whiteout() {
    let readable = tempfile::tempdir().unwrap();
    let writable = tempfile::tempdir().unwrap();
    fs::create_dir(readable.path().join("d")).unwrap();
    fs::write(readable.path().join("d/a"), b"a").unwrap();
    fs::write(readable.path().join("d/b"), b"b").unwrap();
    fs::write(readable.path().join("d/c"), b"c").unwrap();
    fs::create_dir(writable.path().join("d")).unwrap();
    fs::write(writable.path().join("d/a"), b"a-writable").unwrap();

    let log_path = "/.whiteouts.log";
    let readable_layer = DiskLayer::new(readable.path(), true);
    let writable_layer = DiskLayer::new(writable.path(), false);
    let engine = SerializingWrapper::new(
        UnionEngineBuilder::new(writable_layer, readable_layer)
            .whiteout_log_path(log_path)
            .build()
            .unwrap(),
    );
    engine.inner().initialize().await.unwrap();
    engine.unlink("/d/b").await.unwrap();

    let mut names = engine.readdir("/d").await.unwrap();
    names.sort();
    assert_eq!(names, vec!["a".to_string(), "c".to_string()]);
}

#[tokio::test]
async fn unlink_twice_yields_not_found_the_second_time() {
    let readable = tempfile::tempdir().unwrap();
    let writable = tempfile::tempdir().unwrap();
    fs::write(readable.path().join("f"), b"hello").unwrap();

    let engine = engine(&readable, &writable);
    engine.inner().initialize().await.unwrap();

    engine.unlink("/f").await.unwrap();
    let err = engine.unlink("/f").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn mkdir_twice_yields_already_exists_the_second_time() {
    let readable = tempfile::tempdir().unwrap();
    let writable = tempfile::tempdir().unwrap();

    let engine = engine(&readable, &writable);
    engine.inner().initialize().await.unwrap();

    engine.mkdir("/d", 0o755).await.unwrap();
    let err = engine.mkdir("/d", 0o755).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn mkdir_undelete_is_lazy_when_no_whiteout_exists() {
    let readable = tempfile::tempdir().unwrap();
    let writable = tempfile::tempdir().unwrap();

    let readable_layer = DiskLayer::new(readable.path(), true);
    let writable_layer = DiskLayer::new(writable.path(), false);
    let engine = SerializingWrapper::new(
        UnionEngineBuilder::new(writable_layer, readable_layer)
            .clear_stale_whiteout_on_mkdir(false)
            .build()
            .unwrap(),
    );
    engine.inner().initialize().await.unwrap();

    engine.mkdir("/d", 0o755).await.unwrap();

    assert!(!writable.path().join(".deletedFiles.log").exists());
}

#[tokio::test]
async fn mkdir_undelete_clears_a_real_stale_whiteout_even_when_lazy() {
    let readable = tempfile::tempdir().unwrap();
    let writable = tempfile::tempdir().unwrap();
    fs::create_dir(readable.path().join("d")).unwrap();

    let readable_layer = DiskLayer::new(readable.path(), true);
    let writable_layer = DiskLayer::new(writable.path(), false);
    let engine = SerializingWrapper::new(
        UnionEngineBuilder::new(writable_layer, readable_layer)
            .clear_stale_whiteout_on_mkdir(false)
            .build()
            .unwrap(),
    );
    engine.inner().initialize().await.unwrap();

    engine.rmdir("/d").await.unwrap();
    engine.mkdir("/d", 0o755).await.unwrap();

    let log_contents = fs::read_to_string(writable.path().join(".deletedFiles.log")).unwrap();
    assert!(log_contents.lines().any(|line| line == "u/d"));
}

#[tokio::test]
async fn mode_widening_boundary_for_readable_only_entries() {
    let readable = tempfile::tempdir().unwrap();
    let writable = tempfile::tempdir().unwrap();
    use std::os::unix::fs::PermissionsExt;
    fs::write(readable.path().join("ro"), b"data").unwrap();
    fs::set_permissions(readable.path().join("ro"), fs::Permissions::from_mode(0o444)).unwrap();

    let engine = engine(&readable, &writable);
    engine.inner().initialize().await.unwrap();

    let stat = engine.stat("/ro", false).await.unwrap();
    assert_ne!(
        stat.mode & 0o222,
        0,
        "a union stat of a read-only-layer entry must report write bits set"
    );
}
