#[cfg(test)]
mod tests {
    use crate::sidecar::write_atomic;
    use crate::types::{FileEvent, FileOp};
    use crate::watcher::{
        convert_event, has_ignored_name, spawn_debouncer, DebounceTable, RecursiveWatcher, WatchBackend, WatchTree,
        WatcherSettings,
    };
    use notify::event::{
        AccessKind, AccessMode, CreateKind, DataChange, EventKind, MetadataKind, ModifyKind, RemoveKind, RenameMode,
    };
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[derive(Default)]
    struct FakeBackend {
        watched: Vec<PathBuf>,
        unwatched: Vec<PathBuf>,
        fail_on: Option<PathBuf>,
    }

    impl WatchBackend for FakeBackend {
        fn watch(&mut self, path: &Path) -> notify::Result<()> {
            if self.fail_on.as_deref() == Some(path) {
                return Err(notify::Error::generic("watch refused"));
            }
            self.watched.push(path.to_path_buf());
            Ok(())
        }

        fn unwatch(&mut self, path: &Path) -> notify::Result<()> {
            self.unwatched.push(path.to_path_buf());
            Ok(())
        }
    }

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        paths.iter().fold(notify::Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    fn markers() -> Vec<String> {
        vec![".SynologyWorkingDirectory".to_string()]
    }

    // root/{a/{b/c}, a b, e, .SynologyWorkingDirectory/x}
    fn create_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::create_dir_all(base.join("a/b/c")).unwrap();
        fs::create_dir_all(base.join("a b")).unwrap();
        fs::create_dir_all(base.join("e")).unwrap();
        fs::create_dir_all(base.join(".SynologyWorkingDirectory/x")).unwrap();
        fs::write(base.join("a/file.txt"), b"x").unwrap();
        temp_dir
    }

    #[test]
    fn raw_events_are_converted() {
        let created = convert_event(event(EventKind::Create(CreateKind::Folder), &["/r/new"]));
        assert_eq!(created, vec![FileEvent::new("/r/new", FileOp::Create)]);

        let written = convert_event(event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/r/f"]));
        assert_eq!(written, vec![FileEvent::new("/r/f", FileOp::Write)]);

        let chmod = convert_event(event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/r/f"],
        ));
        assert_eq!(chmod, vec![FileEvent::new("/r/f", FileOp::Chmod)]);

        let removed = convert_event(event(EventKind::Remove(RemoveKind::Folder), &["/r/old"]));
        assert_eq!(removed, vec![FileEvent::new("/r/old", FileOp::Remove)]);

        let accessed = convert_event(event(EventKind::Access(AccessKind::Open(AccessMode::Any)), &["/r/f"]));
        assert!(accessed.is_empty());
    }

    #[test]
    fn renames_are_converted() {
        let both = convert_event(event(EventKind::Modify(ModifyKind::Name(RenameMode::Both)), &["/r/old", "/r/new"]));
        assert_eq!(
            both,
            vec![FileEvent::new("/r/old", FileOp::Rename), FileEvent::new("/r/new", FileOp::Create)]
        );

        let from = convert_event(event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/r/old"]));
        assert_eq!(from, vec![FileEvent::new("/r/old", FileOp::Rename)]);

        let to = convert_event(event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/r/new"]));
        assert_eq!(to, vec![FileEvent::new("/r/new", FileOp::Create)]);
    }

    #[test]
    fn registration_is_bounded_by_depth() {
        let temp_dir = create_tree();
        let root = temp_dir.path();
        let mut tree = WatchTree::new(FakeBackend::default(), root, 2, markers());

        let registered = tree.register_root().unwrap();

        assert_eq!(registered, 5);
        assert!(tree.is_watched(root));
        assert!(tree.is_watched(&root.join("a")));
        assert!(tree.is_watched(&root.join("a/b")));
        assert!(tree.is_watched(&root.join("a b")));
        assert!(tree.is_watched(&root.join("e")));
        assert!(!tree.is_watched(&root.join("a/b/c")));
        assert!(!tree.is_watched(&root.join(".SynologyWorkingDirectory")));
        assert!(!tree.is_watched(&root.join("a/file.txt")));
        assert_eq!(tree.backend().watched.len(), 5);
    }

    #[test]
    fn zero_depth_watches_only_root() {
        let temp_dir = create_tree();
        let mut tree = WatchTree::new(FakeBackend::default(), temp_dir.path(), 0, markers());
        assert_eq!(tree.register_root().unwrap(), 1);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn root_watch_failure_is_fatal() {
        let temp_dir = create_tree();
        let backend = FakeBackend { fail_on: Some(temp_dir.path().to_path_buf()), ..Default::default() };
        let mut tree = WatchTree::new(backend, temp_dir.path(), 2, markers());
        assert!(tree.register_root().is_err());
        assert!(tree.is_empty());
    }

    #[test]
    fn subdirectory_watch_failure_is_tolerated() {
        let temp_dir = create_tree();
        let backend = FakeBackend { fail_on: Some(temp_dir.path().join("e")), ..Default::default() };
        let mut tree = WatchTree::new(backend, temp_dir.path(), 2, markers());
        assert_eq!(tree.register_root().unwrap(), 4);
        assert!(!tree.is_watched(&temp_dir.path().join("e")));
    }

    #[test]
    fn created_directories_are_registered_within_budget() {
        let temp_dir = create_tree();
        let root = temp_dir.path();
        let mut tree = WatchTree::new(FakeBackend::default(), root, 2, markers());
        tree.register_root().unwrap();

        fs::create_dir_all(root.join("e/f/g")).unwrap();
        tree.apply(&FileEvent::new(root.join("e/f"), FileOp::Create));
        assert!(tree.is_watched(&root.join("e/f")));
        assert!(!tree.is_watched(&root.join("e/f/g")));

        // too deep on its own
        assert_eq!(tree.register(&root.join("a/b/c")), 0);
        // outside the root
        assert_eq!(tree.register(Path::new("/definitely/elsewhere")), 0);
        assert_eq!(tree.depth_of(Path::new("/definitely/elsewhere")), None);
    }

    #[test]
    fn removal_unregisters_the_whole_subtree() {
        let temp_dir = create_tree();
        let root = temp_dir.path();
        let mut tree = WatchTree::new(FakeBackend::default(), root, 2, markers());
        tree.register_root().unwrap();

        // the directory does not need to exist anymore
        fs::remove_dir_all(root.join("a")).unwrap();
        tree.apply(&FileEvent::new(root.join("a"), FileOp::Remove));

        assert!(!tree.is_watched(&root.join("a")));
        assert!(!tree.is_watched(&root.join("a/b")));
        assert!(tree.is_watched(&root.join("a b")));
        assert!(tree.is_watched(&root.join("e")));
        assert_eq!(tree.backend().unwatched.len(), 2);

        tree.apply(&FileEvent::new(root.join("e"), FileOp::Rename));
        assert!(!tree.is_watched(&root.join("e")));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn recreated_directory_is_registered_again() {
        let temp_dir = create_tree();
        let root = temp_dir.path();
        let mut tree = WatchTree::new(FakeBackend::default(), root, 2, markers());
        tree.register_root().unwrap();

        fs::remove_dir_all(root.join("a")).unwrap();
        tree.apply(&FileEvent::new(root.join("a"), FileOp::Remove));
        let watch_calls = tree.backend().watched.len();

        fs::create_dir_all(root.join("a/b")).unwrap();
        tree.apply(&FileEvent::new(root.join("a"), FileOp::Create));

        assert!(tree.is_watched(&root.join("a")));
        assert!(tree.is_watched(&root.join("a/b")));
        let fresh = &tree.backend().watched[watch_calls..];
        assert_eq!(fresh.len(), 2);
        assert!(fresh.contains(&root.join("a")));
        assert!(fresh.contains(&root.join("a/b")));
    }

    #[test]
    fn ignored_names_match_the_final_component() {
        let names = vec!["@company.yaml".to_string(), ".@company.yaml.tmp".to_string()];
        assert!(has_ignored_name(Path::new("/r/1 Acme/@company.yaml"), &names));
        assert!(has_ignored_name(Path::new("/r/1 Acme/.@company.yaml.tmp"), &names));
        assert!(!has_ignored_name(Path::new("/r/@company.yaml.bak"), &names));
        assert!(!has_ignored_name(Path::new("/r/1 Acme"), &names));
        assert!(!has_ignored_name(Path::new("/"), &names));
    }

    #[test]
    fn excluded_paths_are_recognised() {
        let tree = WatchTree::new(FakeBackend::default(), "/r", 2, markers());
        assert!(tree.is_excluded(Path::new("/r/1 Acme/.SynologyWorkingDirectory/tmp")));
        assert!(!tree.is_excluded(Path::new("/r/1 Acme")));
    }

    #[tokio::test]
    async fn debounce_table_collapses_per_path() {
        let window = Duration::from_millis(1000);
        let t0 = Instant::now();
        let mut table = DebounceTable::new();
        table.push(FileEvent::new("/r/a", FileOp::Create), t0);
        table.push(FileEvent::new("/r/b", FileOp::Write), t0 + Duration::from_millis(10));
        table.push(FileEvent::new("/r/a", FileOp::Remove), t0 + Duration::from_millis(20));
        assert_eq!(table.len(), 2);

        assert!(table.take_due(t0 + Duration::from_millis(900), window).is_empty());
        assert_eq!(table.take_due(t0 + Duration::from_millis(1015), window), vec![FileEvent::new("/r/b", FileOp::Write)]);
        assert_eq!(table.take_due(t0 + Duration::from_millis(1020), window), vec![FileEvent::new("/r/a", FileOp::Remove)]);
        assert!(table.is_empty());

        table.push(FileEvent::new("/r/c", FileOp::Write), t0);
        assert_eq!(table.take_all(), vec![FileEvent::new("/r/c", FileOp::Write)]);
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_emits_after_quiet_window() {
        let window = Duration::from_millis(1000);
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let task = spawn_debouncer(window, in_rx, out_tx);

        in_tx.send(FileEvent::new("/r/a", FileOp::Create)).await.unwrap();
        in_tx.send(FileEvent::new("/r/a", FileOp::Write)).await.unwrap();
        in_tx.send(FileEvent::new("/r/b", FileOp::Create)).await.unwrap();
        in_tx.send(FileEvent::new("/r/a", FileOp::Chmod)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(out_rx.try_recv().is_err());

        let first = out_rx.recv().await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert_eq!(first, FileEvent::new("/r/a", FileOp::Chmod));
        assert_eq!(second, FileEvent::new("/r/b", FileOp::Create));

        drop(in_tx);
        assert!(out_rx.recv().await.is_none());
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_flushes_on_close() {
        let window = Duration::from_secs(60);
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let task = spawn_debouncer(window, in_rx, out_tx);
        let started = Instant::now();

        in_tx.send(FileEvent::new("/r/a", FileOp::Write)).await.unwrap();
        drop(in_tx);

        assert_eq!(out_rx.recv().await, Some(FileEvent::new("/r/a", FileOp::Write)));
        assert_eq!(out_rx.recv().await, None);
        assert!(started.elapsed() < window);
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn recursive_watcher_reports_new_directories() {
        let temp_dir = create_tree();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let settings = WatcherSettings { debounce: Duration::from_millis(50), ..WatcherSettings::default() };

        let (watcher, mut streams) = RecursiveWatcher::start(&root, &settings).unwrap();
        fs::create_dir_all(root.join("new")).unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(change) = streams.events.recv().await {
                if change.path == root.join("new") {
                    return Some(change);
                }
            }
            None
        })
        .await
        .unwrap();
        assert_eq!(seen.map(|c| c.op), Some(FileOp::Create));

        watcher.shutdown().await;
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while streams.events.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn recursive_watcher_drops_ignored_names() {
        let temp_dir = create_tree();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let settings = WatcherSettings {
            debounce: Duration::from_millis(50),
            ignored_names: vec!["@company.yaml".to_string(), ".@company.yaml.tmp".to_string()],
            ..WatcherSettings::default()
        };

        let (watcher, mut streams) = RecursiveWatcher::start(&root, &settings).unwrap();
        write_atomic(&root.join("a/@company.yaml"), "short_name: a\n").unwrap();
        write_atomic(&root.join("e/@company.yaml"), "short_name: e\n").unwrap();
        fs::create_dir_all(root.join("new")).unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(10), async {
            let mut seen = Vec::new();
            while let Some(change) = streams.events.recv().await {
                let done = change.path == root.join("new");
                seen.push(change.path);
                if done {
                    break;
                }
            }
            seen
        })
        .await
        .unwrap();

        assert!(seen.contains(&root.join("new")));
        assert!(!seen.iter().any(|p| has_ignored_name(p, &settings.ignored_names)), "{:?}", seen);
        watcher.shutdown().await;
    }
}
