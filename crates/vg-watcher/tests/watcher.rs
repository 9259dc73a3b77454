//! End-to-end watcher scenarios against a real filesystem.
//!
//! These tests use the polling backend with short intervals: it is fully
//! deterministic across platforms and exercises the same discovery,
//! bookkeeping, and emission pipeline as the native backend.

use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use vg_watcher::{AtomicMode, EventKind, FsWatcher, WatchEvent, WatchOptions};

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn polling_options() -> WatchOptions {
    init_tracing();
    WatchOptions {
        use_polling: true,
        interval_ms: 20,
        ..WatchOptions::default()
    }
}

fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("utf-8 tempdir")
}

fn setup_tree() -> (TempDir, Utf8PathBuf) {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(tmp.path().join("a.txt"), b"a").expect("write");
    fs::write(tmp.path().join("b.txt"), b"b").expect("write");
    fs::create_dir(tmp.path().join("sub")).expect("mkdir");
    fs::write(tmp.path().join("sub/c.txt"), b"c").expect("write");
    let root = utf8(tmp.path());
    (tmp, root)
}

/// Collects events until `ready` fires (inclusive) or the deadline hits.
async fn collect_until_ready(watcher: &mut FsWatcher) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, watcher.recv()).await {
            Ok(Some(event)) => {
                let is_ready = matches!(event, WatchEvent::Ready);
                events.push(event);
                if is_ready {
                    break;
                }
            }
            _ => break,
        }
    }
    events
}

/// Collects whatever arrives within `window`.
async fn collect_for(watcher: &mut FsWatcher, window: Duration) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, watcher.recv()).await {
            Ok(Some(event)) => events.push(event),
            _ => break,
        }
    }
    events
}

fn paths_of_kind(events: &[WatchEvent], kind: EventKind) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.kind() == kind)
        .filter_map(|e| e.path().map(|p| p.to_string()))
        .collect()
}

#[tokio::test]
async fn initial_scan_reports_every_path_and_one_ready() {
    let (_tmp, root) = setup_tree();
    let mut watcher = FsWatcher::watch([root.clone()], polling_options()).expect("create");

    let events = collect_until_ready(&mut watcher).await;

    let adds = paths_of_kind(&events, EventKind::Add);
    assert_eq!(adds.len(), 3, "three files on disk, three adds: {adds:?}");

    let add_dirs = paths_of_kind(&events, EventKind::AddDir);
    assert!(add_dirs.contains(&root.to_string()));
    assert!(add_dirs.contains(&root.join("sub").to_string()));

    let ready_count = events
        .iter()
        .filter(|e| matches!(e, WatchEvent::Ready))
        .count();
    assert_eq!(ready_count, 1);

    // Nothing further fires once the scan has settled.
    let quiet = collect_for(&mut watcher, Duration::from_millis(300)).await;
    assert!(
        !quiet.iter().any(|e| matches!(e, WatchEvent::Ready)),
        "ready must fire exactly once"
    );
    watcher.close().await;
}

#[tokio::test]
async fn get_watched_matches_disk_contents() {
    let (_tmp, root) = setup_tree();
    let mut watcher = FsWatcher::watch([root.clone()], polling_options()).expect("create");
    let _ = collect_until_ready(&mut watcher).await;

    let watched = watcher.get_watched();
    let root_children = watched
        .iter()
        .find(|(dir, _)| *dir == root)
        .map(|(_, children)| children.clone())
        .expect("root is tracked");
    assert_eq!(root_children, vec!["a.txt", "b.txt", "sub"]);

    let sub_children = watched
        .iter()
        .find(|(dir, _)| *dir == root.join("sub"))
        .map(|(_, children)| children.clone())
        .expect("sub is tracked");
    assert_eq!(sub_children, vec!["c.txt"]);

    watcher.close().await;
}

#[tokio::test]
async fn ignore_initial_stays_quiet_then_announces_new_file() {
    let (tmp, root) = setup_tree();
    let options = WatchOptions {
        ignore_initial: true,
        ..polling_options()
    };
    let mut watcher = FsWatcher::watch([root.clone()], options).expect("create");

    let scan = collect_until_ready(&mut watcher).await;
    assert!(
        paths_of_kind(&scan, EventKind::Add).is_empty(),
        "initial files are suppressed"
    );
    assert!(paths_of_kind(&scan, EventKind::AddDir).is_empty());

    fs::write(tmp.path().join("fresh.txt"), b"new").expect("write");
    let events = collect_for(&mut watcher, Duration::from_secs(2)).await;
    let adds = paths_of_kind(&events, EventKind::Add);
    assert_eq!(adds, vec![root.join("fresh.txt").to_string()]);

    watcher.close().await;
}

#[tokio::test]
async fn burst_of_new_files_yields_one_add_each() {
    let (tmp, root) = setup_tree();
    let options = WatchOptions {
        ignore_initial: true,
        ..polling_options()
    };
    let mut watcher = FsWatcher::watch([root], options).expect("create");
    let _ = collect_until_ready(&mut watcher).await;

    for i in 0..5 {
        fs::write(tmp.path().join(format!("burst{i}.txt")), b"x").expect("write");
    }

    let events = collect_for(&mut watcher, Duration::from_secs(3)).await;
    let mut adds = paths_of_kind(&events, EventKind::Add);
    adds.sort_unstable();
    adds.dedup();
    assert_eq!(adds.len(), 5, "each new file announced once: {adds:?}");

    watcher.close().await;
}

#[tokio::test]
async fn change_to_existing_file_is_reported() {
    let (tmp, root) = setup_tree();
    let mut watcher = FsWatcher::watch([root.clone()], polling_options()).expect("create");
    let _ = collect_until_ready(&mut watcher).await;

    fs::write(tmp.path().join("a.txt"), b"a grew considerably").expect("rewrite");

    let events = collect_for(&mut watcher, Duration::from_secs(2)).await;
    let changes = paths_of_kind(&events, EventKind::Change);
    assert!(
        changes.contains(&root.join("a.txt").to_string()),
        "got: {changes:?}"
    );

    watcher.close().await;
}

#[tokio::test]
async fn rename_reports_unlink_then_add() {
    let (tmp, root) = setup_tree();
    let mut watcher = FsWatcher::watch([root.clone()], polling_options()).expect("create");
    let _ = collect_until_ready(&mut watcher).await;

    fs::rename(tmp.path().join("a.txt"), tmp.path().join("renamed.txt")).expect("rename");

    let events = collect_for(&mut watcher, Duration::from_secs(3)).await;
    let unlinks = paths_of_kind(&events, EventKind::Unlink);
    let adds = paths_of_kind(&events, EventKind::Add);
    assert!(unlinks.contains(&root.join("a.txt").to_string()), "{unlinks:?}");
    assert!(adds.contains(&root.join("renamed.txt").to_string()), "{adds:?}");

    watcher.close().await;
}

#[tokio::test]
async fn atomic_delete_recreate_collapses_into_change() {
    let (tmp, root) = setup_tree();
    let options = WatchOptions {
        atomic: AtomicMode::Delay(400),
        ..polling_options()
    };
    let mut watcher = FsWatcher::watch([root.clone()], options).expect("create");
    let _ = collect_until_ready(&mut watcher).await;

    // The editor-style save: unlink, then write the replacement while the
    // unlink is still being debounced.
    let target = tmp.path().join("a.txt");
    fs::remove_file(&target).expect("remove");
    tokio::time::sleep(Duration::from_millis(80)).await;
    fs::write(&target, b"replaced").expect("recreate");

    let events = collect_for(&mut watcher, Duration::from_secs(3)).await;
    let a_path = root.join("a.txt").to_string();

    let unlinks = paths_of_kind(&events, EventKind::Unlink);
    assert!(
        !unlinks.contains(&a_path),
        "debounced unlink must be absorbed: {unlinks:?}"
    );
    let changes = paths_of_kind(&events, EventKind::Change);
    assert!(
        changes.contains(&a_path),
        "the pair must surface as one change: {changes:?}"
    );

    watcher.close().await;
}

#[tokio::test]
async fn nested_rmdir_unlinks_every_level() {
    let tmp = TempDir::new().expect("tempdir");
    fs::create_dir_all(tmp.path().join("outer/inner")).expect("mkdirs");
    fs::write(tmp.path().join("outer/f1.txt"), b"1").expect("write");
    fs::write(tmp.path().join("outer/inner/f2.txt"), b"2").expect("write");
    let root = utf8(tmp.path());

    let mut watcher = FsWatcher::watch([root.clone()], polling_options()).expect("create");
    let _ = collect_until_ready(&mut watcher).await;

    fs::remove_dir_all(tmp.path().join("outer")).expect("rmdir");

    let events = collect_for(&mut watcher, Duration::from_secs(4)).await;
    let unlink_dirs = paths_of_kind(&events, EventKind::UnlinkDir);
    assert!(
        unlink_dirs.contains(&root.join("outer").to_string()),
        "{unlink_dirs:?}"
    );
    assert!(
        unlink_dirs.contains(&root.join("outer/inner").to_string()),
        "{unlink_dirs:?}"
    );
    let unlinks = paths_of_kind(&events, EventKind::Unlink);
    assert!(unlinks.contains(&root.join("outer/f1.txt").to_string()));
    assert!(unlinks.contains(&root.join("outer/inner/f2.txt").to_string()));

    // The table dropped the whole subtree.
    let watched = watcher.get_watched();
    assert!(
        !watched
            .iter()
            .any(|(dir, _)| dir.as_str().contains("outer")),
        "{watched:?}"
    );

    watcher.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_silences_events() {
    let (tmp, root) = setup_tree();
    let mut watcher = FsWatcher::watch([root], polling_options()).expect("create");
    let _ = collect_until_ready(&mut watcher).await;

    watcher.close().await;
    watcher.close().await;

    fs::write(tmp.path().join("after-close.txt"), b"x").expect("write");
    let events = collect_for(&mut watcher, Duration::from_millis(500)).await;
    assert!(events.is_empty(), "no events after close: {events:?}");
}

#[tokio::test]
async fn add_after_close_reopens_the_watcher() {
    let (_tmp, root) = setup_tree();
    let mut watcher = FsWatcher::watch([root.clone()], polling_options()).expect("create");
    let _ = collect_until_ready(&mut watcher).await;

    watcher.close().await;
    assert!(watcher.is_closed());

    watcher.add([root]);
    assert!(!watcher.is_closed(), "adding paths re-opens the watcher");

    let events = collect_until_ready(&mut watcher).await;
    assert!(
        events.iter().any(|e| matches!(e, WatchEvent::Ready)),
        "the re-opened watcher must complete a fresh scan: {events:?}"
    );
    let adds = paths_of_kind(&events, EventKind::Add);
    assert_eq!(adds.len(), 3, "the tree is announced again: {adds:?}");

    watcher.close().await;
}

#[tokio::test]
async fn unwatch_isolates_siblings() {
    let tmp = TempDir::new().expect("tempdir");
    fs::create_dir(tmp.path().join("keep")).expect("mkdir");
    fs::create_dir(tmp.path().join("drop")).expect("mkdir");
    let root = utf8(tmp.path());

    let options = WatchOptions {
        ignore_initial: true,
        ..polling_options()
    };
    let mut watcher = FsWatcher::watch([root.clone()], options).expect("create");
    let _ = collect_until_ready(&mut watcher).await;

    watcher.unwatch([root.join("drop")]);

    fs::write(tmp.path().join("keep/k.txt"), b"k").expect("write");
    fs::write(tmp.path().join("drop/d.txt"), b"d").expect("write");

    let events = collect_for(&mut watcher, Duration::from_secs(2)).await;
    let adds = paths_of_kind(&events, EventKind::Add);
    assert!(
        adds.contains(&root.join("keep/k.txt").to_string()),
        "sibling keeps working: {adds:?}"
    );
    assert!(
        !adds.iter().any(|p| p.contains("drop/")),
        "unwatched subtree is silent: {adds:?}"
    );

    watcher.close().await;
}

#[tokio::test]
async fn missing_path_is_discovered_when_it_appears() {
    let tmp = TempDir::new().expect("tempdir");
    let root = utf8(tmp.path());
    let ghost = root.join("ghost.txt");

    let mut watcher = FsWatcher::watch([ghost.clone()], polling_options()).expect("create");
    let scan = collect_until_ready(&mut watcher).await;
    assert!(
        paths_of_kind(&scan, EventKind::Add).is_empty(),
        "nothing exists yet"
    );

    fs::write(tmp.path().join("ghost.txt"), b"now I exist").expect("write");

    let events = collect_for(&mut watcher, Duration::from_secs(3)).await;
    let adds = paths_of_kind(&events, EventKind::Add);
    assert!(adds.contains(&ghost.to_string()), "{adds:?}");

    watcher.close().await;
}

#[tokio::test]
async fn cwd_makes_event_paths_relative() {
    let (tmp, root) = setup_tree();
    let options = WatchOptions {
        cwd: Some(root.clone()),
        ..polling_options()
    };
    let mut watcher = FsWatcher::watch([root], options).expect("create");

    let events = collect_until_ready(&mut watcher).await;
    let adds = paths_of_kind(&events, EventKind::Add);
    assert!(adds.contains(&"a.txt".to_string()), "{adds:?}");
    assert!(adds.contains(&"sub/c.txt".to_string()), "{adds:?}");
    drop(tmp);

    watcher.close().await;
}

#[tokio::test]
async fn await_write_finish_emits_single_add_after_stability() {
    let (tmp, root) = setup_tree();
    let options = WatchOptions {
        ignore_initial: true,
        await_write_finish: Some(vg_watcher::WriteFinishOptions {
            stability_threshold_ms: 200,
            poll_interval_ms: 30,
        }),
        ..polling_options()
    };
    let mut watcher = FsWatcher::watch([root.clone()], options).expect("create");
    let _ = collect_until_ready(&mut watcher).await;

    // Simulate a slow writer: the file keeps growing for a while.
    let target = tmp.path().join("big.bin");
    fs::write(&target, b"1").expect("write");
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        let mut current = fs::read(&target).expect("read");
        current.extend_from_slice(b"more data");
        fs::write(&target, &current).expect("append");
    }

    let events = collect_for(&mut watcher, Duration::from_secs(3)).await;
    let adds: Vec<_> = paths_of_kind(&events, EventKind::Add)
        .into_iter()
        .filter(|p| p.ends_with("big.bin"))
        .collect();
    assert_eq!(adds.len(), 1, "one add once the size settles: {adds:?}");

    watcher.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_loop_still_reaches_ready() {
    let tmp = TempDir::new().expect("tempdir");
    fs::create_dir(tmp.path().join("a")).expect("mkdir");
    std::os::unix::fs::symlink(tmp.path(), tmp.path().join("a/loop")).expect("symlink");
    let root = utf8(tmp.path());

    let mut watcher = FsWatcher::watch([root], polling_options()).expect("create");
    let events = collect_until_ready(&mut watcher).await;
    assert!(
        events.iter().any(|e| matches!(e, WatchEvent::Ready)),
        "scan must terminate despite the cycle"
    );

    watcher.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn no_follow_watches_the_link_itself() {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(tmp.path().join("target1.txt"), b"one").expect("write");
    fs::write(tmp.path().join("target2.txt"), b"two").expect("write");
    std::os::unix::fs::symlink(tmp.path().join("target1.txt"), tmp.path().join("link"))
        .expect("symlink");
    let root = utf8(tmp.path());

    let options = WatchOptions {
        follow_symlinks: false,
        ..polling_options()
    };
    let mut watcher = FsWatcher::watch([root.clone()], options).expect("create");
    let scan = collect_until_ready(&mut watcher).await;
    let adds = paths_of_kind(&scan, EventKind::Add);
    assert!(adds.contains(&root.join("link").to_string()), "{adds:?}");

    // Retarget the link; the link path itself must report the change.
    fs::remove_file(tmp.path().join("link")).expect("rm link");
    std::os::unix::fs::symlink(tmp.path().join("target2.txt"), tmp.path().join("link"))
        .expect("relink");

    let events = collect_for(&mut watcher, Duration::from_secs(3)).await;
    let touched: Vec<_> = events
        .iter()
        .filter(|e| e.path().is_some_and(|p| p == root.join("link")))
        .map(WatchEvent::kind)
        .collect();
    assert!(!touched.is_empty(), "the link must be reported: {events:?}");

    watcher.close().await;
}

#[tokio::test]
async fn depth_limit_ignores_deeper_levels() {
    let tmp = TempDir::new().expect("tempdir");
    fs::create_dir_all(tmp.path().join("l1/l2")).expect("mkdirs");
    fs::write(tmp.path().join("top.txt"), b"t").expect("write");
    fs::write(tmp.path().join("l1/mid.txt"), b"m").expect("write");
    fs::write(tmp.path().join("l1/l2/deep.txt"), b"d").expect("write");
    let root = utf8(tmp.path());

    let options = WatchOptions {
        depth: Some(0),
        ..polling_options()
    };
    let mut watcher = FsWatcher::watch([root.clone()], options).expect("create");
    let events = collect_until_ready(&mut watcher).await;

    let adds = paths_of_kind(&events, EventKind::Add);
    assert!(adds.contains(&root.join("top.txt").to_string()));
    assert!(
        !adds.iter().any(|p| p.contains("deep.txt")),
        "beyond the depth limit: {adds:?}"
    );

    watcher.close().await;
}
