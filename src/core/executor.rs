//! 下载执行器
//!
//! 单个文件的传输：写入同目录临时文件，校验字节数和内容哈希，
//! 再原子重命名到目标位置；任何失败都不会留下半成品文件

use crate::core::outcome::Outcome;
use crate::core::retry::RetryPolicy;
use crate::error::MirrorError;
use crate::storage::{content_hash, Storage};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info};

/// 一次文件传输的任务描述，恰好被消费一次
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub remote_path: String,
    pub local_path: PathBuf,
    /// 列表/探测时观察到的大小
    pub expected_size: u64,
    /// 后端提供的内容哈希（可选）
    pub expected_checksum: Option<String>,
}

pub struct Downloader {
    storage: Arc<dyn Storage>,
    retry: RetryPolicy,
    verify_checksum: bool,
    cancelled: Arc<AtomicBool>,
}

impl Downloader {
    pub fn new(
        storage: Arc<dyn Storage>,
        retry: RetryPolicy,
        verify_checksum: bool,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            storage,
            retry,
            verify_checksum,
            cancelled,
        }
    }

    /// 执行一次传输
    ///
    /// 前置条件：目标文件的父目录已存在。
    /// 节点级失败（网络耗尽重试、完整性不符）作为 Outcome 返回；
    /// 本地磁盘错误和取消作为 Err 向上传播并终止运行。
    pub async fn download(&self, task: &TransferTask) -> Result<Outcome, MirrorError> {
        debug!(
            "下载文件: {} -> {:?} ({} 字节)",
            task.remote_path, task.local_path, task.expected_size
        );

        let remote_path = task.remote_path.clone();
        let data = match self
            .retry
            .run(&self.cancelled, || self.storage.fetch(&remote_path))
            .await
        {
            Ok(data) => data,
            Err(e) if e.is_run_fatal() => return Err(e),
            Err(e) => {
                error!("下载失败: {} - {}", task.remote_path, e);
                return Ok(Outcome::failed(&task.remote_path, &e));
            }
        };

        // 校验字节数
        if data.len() as u64 != task.expected_size {
            let e = MirrorError::integrity(
                &task.remote_path,
                format!("期望 {} 字节，实际 {} 字节", task.expected_size, data.len()),
            );
            error!("{}", e);
            return Ok(Outcome::failed(&task.remote_path, &e));
        }

        // 校验内容哈希
        if self.verify_checksum {
            if let Some(expected) = &task.expected_checksum {
                let actual = content_hash(&data);
                if &actual != expected {
                    let e = MirrorError::integrity(
                        &task.remote_path,
                        format!("哈希不匹配 (期望 {}, 实际 {})", expected, actual),
                    );
                    error!("{}", e);
                    return Ok(Outcome::failed(&task.remote_path, &e));
                }
            }
        }

        let temp_path = temp_path_for(&task.local_path);

        // 失败时清理临时文件
        let cleanup = scopeguard::guard(temp_path.clone(), |p| {
            let _ = std::fs::remove_file(&p);
        });

        fs::write(&temp_path, &data)
            .await
            .map_err(|e| MirrorError::from_local_io("写入临时文件失败", e))?;

        fs::rename(&temp_path, &task.local_path)
            .await
            .map_err(|e| MirrorError::from_local_io("重命名临时文件失败", e))?;

        // 已重命名，无需清理
        let _ = scopeguard::ScopeGuard::into_inner(cleanup);

        info!("下载完成: {} ({} 字节)", task.remote_path, data.len());
        Ok(Outcome::succeeded(&task.remote_path, data.len() as u64))
    }
}

/// 目标同目录下的临时文件路径
fn temp_path_for(local_path: &Path) -> PathBuf {
    let file_name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let parent = local_path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{}.{}.part", file_name, &suffix[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::outcome::OutcomeStatus;
    use crate::storage::LocalStorage;

    fn downloader_for(remote: &Path) -> Downloader {
        let storage: Arc<dyn Storage> =
            Arc::new(LocalStorage::new(remote.to_str().unwrap()).unwrap());
        Downloader::new(
            storage,
            RetryPolicy::new(0, 1),
            true,
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn part_files(dir: &Path) -> Vec<PathBuf> {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".part"))
            .map(|e| e.path().to_path_buf())
            .collect()
    }

    #[tokio::test]
    async fn test_download_writes_identical_bytes() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("a.bin"), b"\x00\x01\x02payload").unwrap();

        let downloader = downloader_for(remote.path());
        let task = TransferTask {
            remote_path: "a.bin".into(),
            local_path: local.path().join("a.bin"),
            expected_size: 10,
            expected_checksum: Some(content_hash(b"\x00\x01\x02payload")),
        };

        let outcome = downloader.download(&task).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
        assert_eq!(outcome.bytes, 10);
        assert_eq!(
            std::fs::read(local.path().join("a.bin")).unwrap(),
            b"\x00\x01\x02payload"
        );
        assert!(part_files(local.path()).is_empty());
    }

    #[tokio::test]
    async fn test_size_mismatch_leaves_no_file() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("a.bin"), b"short").unwrap();

        let downloader = downloader_for(remote.path());
        let task = TransferTask {
            remote_path: "a.bin".into(),
            local_path: local.path().join("a.bin"),
            // 列表后远端被改写的场景
            expected_size: 9999,
            expected_checksum: None,
        };

        let outcome = downloader.download(&task).await.unwrap();
        assert!(matches!(outcome.status, OutcomeStatus::Failed(_)));
        assert!(!local.path().join("a.bin").exists());
        assert!(part_files(local.path()).is_empty());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_fails() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("a.bin"), b"content").unwrap();

        let downloader = downloader_for(remote.path());
        let task = TransferTask {
            remote_path: "a.bin".into(),
            local_path: local.path().join("a.bin"),
            expected_size: 7,
            expected_checksum: Some("0".repeat(32)),
        };

        let outcome = downloader.download(&task).await.unwrap();
        assert!(matches!(outcome.status, OutcomeStatus::Failed(_)));
        assert!(!local.path().join("a.bin").exists());
    }

    #[tokio::test]
    async fn test_missing_remote_is_node_local_failure() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();

        let downloader = downloader_for(remote.path());
        let task = TransferTask {
            remote_path: "gone.bin".into(),
            local_path: local.path().join("gone.bin"),
            expected_size: 1,
            expected_checksum: None,
        };

        // 远端条目消失是节点级失败，不终止运行
        let outcome = downloader.download(&task).await.unwrap();
        assert!(matches!(outcome.status, OutcomeStatus::Failed(_)));
    }
}
