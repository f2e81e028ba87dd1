//! 目录树遍历器
//!
//! 用显式工作队列驱动递归下载，保证内存有界、取消和并发上限易于实施。
//! 每个目录节点经历 Pending -> Listing -> Dispatching -> Done；
//! 进入 Dispatching 时即创建本地目录，因此空目录也会在本地出现

use crate::core::executor::{Downloader, TransferTask};
use crate::core::outcome::{Outcome, OutcomeSink};
use crate::core::retry::RetryPolicy;
use crate::error::MirrorError;
use crate::storage::{basename, Entry, Storage};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 目录节点状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Listing,
    Dispatching,
    Done,
}

struct DirNode {
    remote_path: String,
    local_path: PathBuf,
    state: NodeState,
}

/// 目标目录的既有文件快照，用于跳过未变化的文件
struct LocalSnapshot {
    files: HashMap<PathBuf, (u64, i64)>,
}

impl LocalSnapshot {
    /// 扫描目标目录（不存在时返回空快照）
    async fn scan(root: &Path) -> Self {
        if !root.exists() {
            return Self {
                files: HashMap::new(),
            };
        }

        let root = root.to_path_buf();
        // 使用 spawn_blocking 避免阻塞 async runtime
        let files = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter_map(|entry| {
                    let metadata = entry.metadata().ok()?;
                    if metadata.is_dir() {
                        return None;
                    }
                    let modified = metadata
                        .modified()
                        .ok()?
                        .duration_since(std::time::UNIX_EPOCH)
                        .ok()?
                        .as_secs() as i64;
                    Some((entry.path().to_path_buf(), (metadata.len(), modified)))
                })
                .collect::<HashMap<_, _>>()
        })
        .await
        .unwrap_or_default();

        Self { files }
    }

    /// 本地文件大小一致且不旧于远端时跳过
    fn skip_reason(&self, local_path: &Path, entry: &Entry) -> Option<&'static str> {
        let (size, modified) = self.files.get(local_path)?;
        if *size != entry.size {
            return None;
        }
        if entry.modified_time > *modified {
            // 远端较新，重新下载
            return None;
        }
        Some("已存在")
    }
}

pub struct TreeSynchronizer {
    storage: Arc<dyn Storage>,
    downloader: Arc<Downloader>,
    sink: Arc<OutcomeSink>,
    retry: RetryPolicy,
    max_concurrent_transfers: usize,
    cancelled: Arc<AtomicBool>,
}

impl TreeSynchronizer {
    pub fn new(
        storage: Arc<dyn Storage>,
        downloader: Arc<Downloader>,
        sink: Arc<OutcomeSink>,
        retry: RetryPolicy,
        max_concurrent_transfers: usize,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            storage,
            downloader,
            sink,
            retry,
            max_concurrent_transfers,
            cancelled,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 镜像一棵远程目录树到本地
    ///
    /// 节点级失败（某个目录列不出来、某个文件传不下来）记录为结果后
    /// 继续处理其余条目；本地磁盘错误终止整个运行
    pub async fn run(&self, root_remote: &str, dest_root: &Path) -> Result<(), MirrorError> {
        let snapshot = LocalSnapshot::scan(dest_root).await;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_transfers));
        let mut handles: Vec<JoinHandle<Result<(), MirrorError>>> = Vec::new();

        let mut queue = VecDeque::new();
        queue.push_back(DirNode {
            remote_path: root_remote.trim_matches('/').to_string(),
            local_path: dest_root.to_path_buf(),
            state: NodeState::Pending,
        });

        while let Some(mut node) = queue.pop_front() {
            if self.is_cancelled() {
                break;
            }

            node.state = NodeState::Listing;
            let remote_path = node.remote_path.clone();
            let entries = match self
                .retry
                .run(&self.cancelled, || self.storage.list_dir(&remote_path))
                .await
            {
                Ok(entries) => entries,
                Err(MirrorError::Cancelled) => break,
                Err(e) if e.is_run_fatal() => {
                    self.drain_inflight(&mut handles).await;
                    return Err(e);
                }
                Err(e) => {
                    warn!("列目录失败: {} - {}", node.remote_path, e);
                    self.sink.record(Outcome::failed(&node.remote_path, &e)).await;
                    continue;
                }
            };

            node.state = NodeState::Dispatching;

            // 即使目录为空也要在本地创建
            if fs::metadata(&node.local_path).await.is_err() {
                debug!("mkdir {:?}", node.local_path);
                if let Err(e) = fs::create_dir_all(&node.local_path).await {
                    self.drain_inflight(&mut handles).await;
                    return Err(MirrorError::from_local_io("创建本地目录失败", e));
                }
                self.sink.add_dir_created();
            }

            for entry in entries {
                if self.is_cancelled() {
                    break;
                }

                let child_local = node.local_path.join(basename(&entry.path));

                if entry.is_dir {
                    queue.push_back(DirNode {
                        remote_path: entry.path,
                        local_path: child_local,
                        state: NodeState::Pending,
                    });
                    continue;
                }

                if let Some(reason) = snapshot.skip_reason(&child_local, &entry) {
                    debug!("跳过文件: {} ({})", entry.path, reason);
                    self.sink.record(Outcome::skipped(&entry.path, reason)).await;
                    continue;
                }

                let permit = semaphore.clone().acquire_owned().await.unwrap();
                let task = TransferTask {
                    remote_path: entry.path,
                    local_path: child_local,
                    expected_size: entry.size,
                    expected_checksum: entry.checksum,
                };
                let downloader = self.downloader.clone();
                let sink = self.sink.clone();

                handles.push(tokio::spawn(async move {
                    let result = downloader.download(&task).await;
                    drop(permit);
                    match result {
                        Ok(outcome) => {
                            sink.record(outcome).await;
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }));
            }

            node.state = NodeState::Done;
            debug!("目录完成: {} ({:?})", node.remote_path, node.state);
        }

        // 等待所有传输完成
        let mut fatal = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(MirrorError::Cancelled)) => {}
                Ok(Err(e)) => {
                    // 运行级错误：停止派发剩余任务
                    self.cancelled.store(true, Ordering::SeqCst);
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => warn!("传输任务异常退出: {}", e),
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 运行级错误后回收在途任务
    async fn drain_inflight(&self, handles: &mut Vec<JoinHandle<Result<(), MirrorError>>>) {
        self.cancelled.store(true, Ordering::SeqCst);
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }
}
