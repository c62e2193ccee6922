use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use quotafs::{
    ChangeKind, MemoryPathProvider, MigrationCoordinator, PathProvider, QuotaConfig,
    SecureFileStore, StoreError, StoreEvent, StoreOptions, WatchBackend,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// Helper to build a store over a fresh temporary root
fn setup_store(max_bytes: u64) -> (TempDir, SecureFileStore) {
    let dir = TempDir::new().unwrap();
    let config = QuotaConfig::new(dir.path(), max_bytes).unwrap();
    let store = SecureFileStore::new(config, StoreOptions::default()).unwrap();
    (dir, store)
}

fn never() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn test_quota_rejects_write_that_would_exceed() {
    let (_dir, store) = setup_store(1_000_000);
    store
        .write_bytes("/a.txt", &vec![0u8; 600_000], &never())
        .await
        .unwrap();

    let info = store.quota_info(&never()).await.unwrap();
    assert_eq!(info.current_usage_bytes, 600_000);
    assert!((info.usage_percentage - 0.6).abs() < 1e-9);
    assert!(!info.is_exceeded);

    let err = store
        .write_bytes("/b.txt", &vec![0u8; 500_000], &never())
        .await
        .unwrap_err();
    match err {
        StoreError::QuotaExceeded {
            requested,
            available,
        } => {
            assert_eq!(requested, 500_000);
            assert_eq!(available, 400_000);
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }
    assert!(!store.root().join("b.txt").exists());
    assert_eq!(
        err_message(500_000, 400_000),
        "Storage quota exceeded, 400000 bytes available"
    );
}

fn err_message(requested: u64, available: u64) -> String {
    StoreError::QuotaExceeded {
        requested,
        available,
    }
    .user_message()
}

#[tokio::test]
async fn test_overwrite_adjusts_usage_by_delta() {
    let (_dir, store) = setup_store(1_000_000);
    store.write_bytes("f.txt", &[1u8; 100], &never()).await.unwrap();
    let before = store.quota_info(&never()).await.unwrap().current_usage_bytes;

    store.write_bytes("f.txt", &[1u8; 300], &never()).await.unwrap();
    let after = store.quota_info(&never()).await.unwrap().current_usage_bytes;
    assert_eq!(after - before, 200);
}

#[tokio::test]
async fn test_warning_event_near_threshold() {
    let (_dir, store) = setup_store(1000);
    let mut events = store.subscribe();
    store.write_bytes("a.bin", &[0u8; 950], &never()).await.unwrap();

    let mut warned = false;
    while let Some(event) = events.try_recv() {
        if let StoreEvent::QuotaWarningRaised { quota_limit, .. } = event {
            assert_eq!(quota_limit, 1000);
            warned = true;
        }
    }
    assert!(warned);
}

#[tokio::test]
async fn test_cancelled_copy_keeps_completed_files() {
    let (_dir, store) = setup_store(1_000_000);
    for i in 0..5 {
        store
            .write_bytes(&format!("src/file{i}.txt"), b"data", &never())
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    let done = AtomicUsize::new(0);
    let stop_after = 2;
    let progress = |_: f64| {
        if done.fetch_add(1, Ordering::SeqCst) + 1 == stop_after {
            cancel.cancel();
        }
    };
    let err = store
        .copy("src", "dst", Some(&progress), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::OperationCancelled));

    let copied = std::fs::read_dir(store.root().join("dst")).unwrap().count();
    assert_eq!(copied, stop_after);
    // Partial work is not trusted for accounting.
    assert_eq!(store.usage_cache().cached(Duration::from_secs(300)), None);
}

#[tokio::test]
async fn test_traversal_and_outside_paths_rejected() {
    let (_dir, store) = setup_store(1000);
    let outside = TempDir::new().unwrap();

    for bad in ["../../etc/passwd", "~/secrets", "a/../../b", "a\0b"] {
        let err = store.list(bad, &never()).await.unwrap_err();
        assert!(err.is_validation(), "{bad} should be rejected, got {err:?}");
    }

    // Absolute paths outside the root are read as paths inside it.
    std::fs::write(outside.path().join("x"), b"secret").unwrap();
    let err = store
        .open(&outside.path().join("x").to_string_lossy(), &never())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(ref p) if p.starts_with(store.root())));
}

#[tokio::test]
async fn test_directory_lifecycle() {
    let (_dir, store) = setup_store(100_000);
    store.create_directory("/photos/2024", &never()).await.unwrap();
    store.write_bytes("/photos/2024/a.jpg", b"jpeg", &never()).await.unwrap();
    store.write_bytes("/photos/b.PNG", b"png!", &never()).await.unwrap();
    store.write_bytes("/photos/.thumbs", b"x", &never()).await.unwrap();

    let listing = store.list("/photos", &never()).await.unwrap();
    let names: Vec<_> = listing.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["2024", "b.PNG"]);
    assert!(listing[0].is_directory);
    assert_eq!(listing[0].size_bytes, 0);

    let pngs = store.list_by_extension("/photos", "png", &never()).await.unwrap();
    assert_eq!(pngs.len(), 1);

    store
        .rename("/photos/2024", "/archive/2024", &never())
        .await
        .unwrap();
    let props = store.properties("/archive", &never()).await.unwrap();
    assert!(props.is_directory);
    assert_eq!(props.size_bytes, 4);

    store.delete("/archive", &never()).await.unwrap();
    store.delete("/photos", &never()).await.unwrap();
    assert_eq!(store.quota_info(&never()).await.unwrap().current_usage_bytes, 0);
    assert!(store.list("/", &never()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_streamed_read_of_written_file() {
    use tokio::io::AsyncReadExt;

    let (_dir, store) = setup_store(1_000_000);
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let mut reader: &[u8] = &payload;
    let written = store
        .write("blob.bin", &mut reader, None, 8 * 1024, &never())
        .await
        .unwrap();
    assert_eq!(written, payload.len() as u64);

    let mut opened = store.open("blob.bin", &never()).await.unwrap();
    assert_eq!(opened.len(), payload.len() as u64);
    let mut read_back = Vec::new();
    opened.read_to_end(&mut read_back).await.unwrap();
    assert_eq!(read_back, payload);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_to_one_path_do_not_interleave() {
    let (_dir, store) = setup_store(10_000_000);
    let store = Arc::new(store);

    let mut tasks = Vec::new();
    for byte in [b'a', b'b', b'c', b'd'] {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            let data = vec![byte; 200_000];
            store.write_bytes("shared.bin", &data, &never()).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let contents = std::fs::read(store.root().join("shared.bin")).unwrap();
    assert_eq!(contents.len(), 200_000);
    assert!(contents.iter().all(|b| *b == contents[0]));
    assert_eq!(
        store.quota_info(&never()).await.unwrap().current_usage_bytes,
        200_000
    );
}

#[tokio::test]
async fn test_external_change_reaches_subscribers() {
    let dir = TempDir::new().unwrap();
    let config = QuotaConfig::new(dir.path(), 1_000_000).unwrap();
    let options = StoreOptions {
        watch_backend: WatchBackend::Polling,
        poll_interval: Duration::from_millis(50),
        ..StoreOptions::default()
    };
    let store = SecureFileStore::new(config, options).unwrap();
    store.quota_info(&never()).await.unwrap();
    store.start_watching().unwrap();
    store.start_watching().unwrap();
    assert!(store.is_watching());

    let mut events = store.subscribe();
    tokio::time::sleep(Duration::from_millis(150)).await;
    std::fs::write(store.root().join("dropped-in.txt"), b"external").unwrap();

    let change = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(StoreEvent::FileSystemChanged(change)) => return Some(change),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    .expect("no change event")
    .expect("bus closed");
    assert!(change.path.ends_with("dropped-in.txt"));
    assert!(matches!(
        change.change_kind,
        ChangeKind::Created | ChangeKind::Modified
    ));
    assert_eq!(
        store.quota_info(&never()).await.unwrap().current_usage_bytes,
        8
    );

    store.shutdown();
    assert!(!store.is_watching());
}

#[tokio::test]
async fn test_migration_then_reopen_at_new_root() {
    let (_dir, store) = setup_store(1_000_000);
    let target = TempDir::new().unwrap();
    let provider = MemoryPathProvider::new(store.root().to_string_lossy());
    store.write_bytes("docs/readme.md", b"# hi", &never()).await.unwrap();

    let new_root = target.path().join("next");
    let report = MigrationCoordinator::new(&store)
        .migrate(&new_root.to_string_lossy(), None, &never())
        .await
        .unwrap();
    assert_eq!(report.files_copied, 1);
    provider.set_root_path(&new_root.to_string_lossy()).unwrap();
    store.shutdown();

    let config = QuotaConfig::new(provider.get_root_path(), 1_000_000).unwrap();
    let reopened = SecureFileStore::new(config, StoreOptions::default()).unwrap();
    let opened = reopened.open("/docs/readme.md", &never()).await.unwrap();
    assert_eq!(opened.as_bytes(), Some(&b"# hi"[..]));
}

#[tokio::test]
async fn test_operations_after_shutdown_fail() {
    let (_dir, store) = setup_store(1000);
    store.shutdown();
    store.shutdown();
    let err = store.write_bytes("a", b"x", &never()).await.unwrap_err();
    assert!(matches!(err, StoreError::ShutDown));
    assert!(matches!(store.start_watching(), Err(StoreError::ShutDown)));
}
