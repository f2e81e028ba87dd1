//! 端到端镜像测试，以本地目录作为远程系统

use async_trait::async_trait;
use mirrortools_lib::core::{
    Downloader, OutcomeSink, RetryPolicy, RunOptions, TreeSynchronizer,
};
use mirrortools_lib::error::MirrorError;
use mirrortools_lib::storage::{Entry, EntryMeta, LocalStorage, Storage};
use mirrortools_lib::{MirrorConfig, MirrorEngine, RunStatus, StorageConfig};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn engine_for(remote: &Path) -> MirrorEngine {
    let mut config = MirrorConfig::default();
    config
        .systems
        .insert("fx".to_string(), StorageConfig::local(remote.to_str().unwrap()));
    config.transfer.max_retries = 0;
    config.transfer.retry_base_delay_ms = 1;
    MirrorEngine::new(config)
}

fn recursive() -> RunOptions {
    RunOptions {
        recursive: true,
        rename: None,
    }
}

/// 目录树里所有以 .part 结尾的临时残留
fn part_residue(dir: &Path) -> usize {
    walk(dir)
        .iter()
        .filter(|p| p.to_string_lossy().ends_with(".part"))
        .count()
}

fn walk(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.extend(walk(&path));
            }
            out.push(path);
        }
    }
    out
}

#[tokio::test]
async fn empty_directory_mirrors_to_empty_local_directory() {
    let remote = tempfile::tempdir().unwrap();
    std::fs::create_dir(remote.path().join("empty-directory")).unwrap();

    let dest = tempfile::tempdir().unwrap();
    let report = engine_for(remote.path())
        .run("fx://empty-directory", dest.path(), recursive())
        .await;

    assert_eq!(report.status, RunStatus::AllSucceeded);
    assert_eq!(report.status.exit_code(), 0);

    let mirrored = dest.path().join("empty-directory");
    assert!(mirrored.is_dir());
    assert_eq!(std::fs::read_dir(&mirrored).unwrap().count(), 0);
}

#[tokio::test]
async fn near_empty_directory_creates_all_subdirs() {
    let remote = tempfile::tempdir().unwrap();
    let root = remote.path().join("near-empty-directory");
    std::fs::create_dir_all(root.join("level1/level2")).unwrap();

    let dest = tempfile::tempdir().unwrap();
    let report = engine_for(remote.path())
        .run("fx://near-empty-directory", dest.path(), recursive())
        .await;

    assert_eq!(report.status, RunStatus::AllSucceeded);
    assert!(dest
        .path()
        .join("near-empty-directory/level1/level2")
        .is_dir());
}

#[tokio::test]
async fn good_directory_with_an_empty_subdir() {
    let remote = tempfile::tempdir().unwrap();
    let root = remote.path().join("good-directory");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(root.join("a.txt"), b"alpha\n").unwrap();
    std::fs::write(root.join("b.txt"), b"bravo\n").unwrap();
    std::fs::create_dir(root.join("empty-sub")).unwrap();

    let dest = tempfile::tempdir().unwrap();
    let report = engine_for(remote.path())
        .run("fx://good-directory", dest.path(), recursive())
        .await;

    assert_eq!(report.status, RunStatus::AllSucceeded);
    assert_eq!(report.filesTransferred, 2);

    let mirrored = dest.path().join("good-directory");
    assert_eq!(std::fs::read(mirrored.join("a.txt")).unwrap(), b"alpha\n");
    assert_eq!(std::fs::read(mirrored.join("b.txt")).unwrap(), b"bravo\n");
    assert!(mirrored.join("empty-sub").is_dir());
    assert_eq!(
        std::fs::read_dir(mirrored.join("empty-sub")).unwrap().count(),
        0
    );
    assert_eq!(part_residue(dest.path()), 0);
}

#[tokio::test]
async fn single_file_is_byte_identical_without_residue() {
    let remote = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..=255u8).cycle().take(65536 + 13).collect();
    std::fs::write(remote.path().join("blob.bin"), &payload).unwrap();

    let dest = tempfile::tempdir().unwrap();
    let report = engine_for(remote.path())
        .run("fx://blob.bin", dest.path(), RunOptions::default())
        .await;

    assert_eq!(report.status, RunStatus::AllSucceeded);
    assert_eq!(
        std::fs::read(dest.path().join("blob.bin")).unwrap(),
        payload
    );
    assert_eq!(part_residue(dest.path()), 0);
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let remote = tempfile::tempdir().unwrap();
    let root = remote.path().join("data");
    std::fs::create_dir_all(root.join("sub")).unwrap();
    std::fs::write(root.join("a.txt"), b"one").unwrap();
    std::fs::write(root.join("sub/b.txt"), b"two").unwrap();

    let dest = tempfile::tempdir().unwrap();
    let engine = engine_for(remote.path());

    let first = engine.run("fx://data", dest.path(), recursive()).await;
    assert_eq!(first.status, RunStatus::AllSucceeded);
    assert_eq!(first.filesTransferred, 2);

    let mtime_before = std::fs::metadata(dest.path().join("data/a.txt"))
        .unwrap()
        .modified()
        .unwrap();

    let second = engine.run("fx://data", dest.path(), recursive()).await;
    assert_eq!(second.status, RunStatus::AllSucceeded);
    assert_eq!(second.filesFailed, 0);
    assert_eq!(second.filesTransferred, 0);
    assert_eq!(second.filesSkipped, 2);

    // 本地树未被改动
    let mtime_after = std::fs::metadata(dest.path().join("data/a.txt"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(mtime_before, mtime_after);
}

#[tokio::test]
async fn malformed_reference_exits_nonzero_immediately() {
    let dest = tempfile::tempdir().unwrap();
    let engine = MirrorEngine::new(MirrorConfig::default());

    let report = engine
        .run("definitely not a reference", dest.path(), recursive())
        .await;

    assert_eq!(report.status, RunStatus::TotalFailure);
    assert_ne!(report.status.exit_code(), 0);
    assert_eq!(report.filesTransferred, 0);
    assert_eq!(report.dirsCreated, 0);
}

/// 包装后端：指定路径的内容在传输中被截断
struct TruncatingStorage {
    inner: LocalStorage,
    victim: String,
}

#[async_trait]
impl Storage for TruncatingStorage {
    async fn stat(&self, path: &str) -> Result<Option<EntryMeta>, MirrorError> {
        self.inner.stat(path).await
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<Entry>, MirrorError> {
        self.inner.list_dir(path).await
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, MirrorError> {
        let mut data = self.inner.fetch(path).await?;
        if path == self.victim {
            data.truncate(1);
        }
        Ok(data)
    }

    fn name(&self) -> &str {
        "truncating"
    }
}

#[tokio::test]
async fn integrity_failure_on_one_file_is_partial_failure() {
    let remote = tempfile::tempdir().unwrap();
    std::fs::write(remote.path().join("good.txt"), b"good contents").unwrap();
    std::fs::write(remote.path().join("bad.txt"), b"bad contents").unwrap();

    let storage: Arc<dyn Storage> = Arc::new(TruncatingStorage {
        inner: LocalStorage::new(remote.path().to_str().unwrap()).unwrap(),
        victim: "bad.txt".to_string(),
    });

    let cancelled = Arc::new(AtomicBool::new(false));
    let retry = RetryPolicy::new(0, 1);
    let sink = Arc::new(OutcomeSink::new());
    let downloader = Arc::new(Downloader::new(
        storage.clone(),
        retry,
        true,
        cancelled.clone(),
    ));

    let dest = tempfile::tempdir().unwrap();
    let dest_root = dest.path().join("mirror");

    TreeSynchronizer::new(storage, downloader, sink.clone(), retry, 4, cancelled)
        .run("", &dest_root)
        .await
        .unwrap();

    assert_eq!(sink.files_succeeded(), 1);
    assert_eq!(sink.files_failed(), 1);
    assert_eq!(sink.reduce(), RunStatus::PartialFailure);
    assert_ne!(sink.reduce().exit_code(), 0);

    // 损坏的文件没有落盘，完好的文件内容正确
    assert!(!dest_root.join("bad.txt").exists());
    assert_eq!(
        std::fs::read(dest_root.join("good.txt")).unwrap(),
        b"good contents"
    );
    assert_eq!(part_residue(dest.path()), 0);
}
