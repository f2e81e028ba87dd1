//! 同步引擎
//!
//! 一次调用 = 一次运行：解析引用 -> 单文件或目录树下载 -> 归约报告。
//! 运行间不共享任何状态

use crate::config::MirrorConfig;
use crate::core::executor::{Downloader, TransferTask};
use crate::core::outcome::{MirrorReport, OutcomeSink, RunStatus};
use crate::core::reference::RemoteRef;
use crate::core::resolver::{PathResolver, RemoteHandle, RemoteKind};
use crate::core::retry::RetryPolicy;
use crate::core::tree::TreeSynchronizer;
use crate::error::MirrorError;
use crate::storage::{basename, create_storage};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info, warn};

/// 单次运行的选项
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// 目录模式；文件引用时退化为单文件下载
    pub recursive: bool,
    /// 单文件模式下的另存文件名
    pub rename: Option<String>,
}

/// 同步引擎
pub struct MirrorEngine {
    config: MirrorConfig,
    cancelled: Arc<AtomicBool>,
}

impl MirrorEngine {
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 取消当前运行
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 取消标志的句柄（供信号处理使用）
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 执行一次同步运行
    ///
    /// 从不返回 Err：所有失败都体现在报告的状态和错误列表里
    pub async fn run(&self, reference: &str, dest: &Path, opts: RunOptions) -> MirrorReport {
        let start_time = chrono::Utc::now().timestamp();
        let run_id = uuid::Uuid::new_v4().to_string();

        info!("开始同步: {} -> {:?}", reference, dest);

        // 重置取消标志
        self.cancelled.store(false, Ordering::SeqCst);

        // 解析引用（不发起远程调用）
        let remote_ref = match RemoteRef::parse(reference) {
            Ok(r) => r,
            Err(e) => {
                error!("引用解析失败: {}", e);
                return self.failed_report(&run_id, reference, start_time, vec![e.to_string()]);
            }
        };

        let system_config = match self.config.systems.get(&remote_ref.system) {
            Some(c) => c,
            None => {
                let msg = format!("未配置的存储系统: {}", remote_ref.system);
                error!("{}", msg);
                return self.failed_report(&run_id, reference, start_time, vec![msg]);
            }
        };

        let storage = match create_storage(&remote_ref.system, system_config).await {
            Ok(s) => s,
            Err(e) => {
                error!("存储连接失败: {}", e);
                return self.failed_report(
                    &run_id,
                    reference,
                    start_time,
                    vec![format!("存储连接失败: {}", e)],
                );
            }
        };

        let retry = RetryPolicy::new(
            self.config.transfer.max_retries,
            self.config.transfer.retry_base_delay_ms,
        );

        // 探测引用类型
        let resolver = PathResolver::new(storage.clone(), retry);
        let handle = match resolver.resolve(&remote_ref, &self.cancelled).await {
            Ok(h) => h,
            Err(e) => {
                error!("解析远程路径失败: {}", e);
                return self.failed_report(&run_id, reference, start_time, vec![e.to_string()]);
            }
        };

        if handle.kind == RemoteKind::Directory && !opts.recursive {
            let msg = format!("{} 是目录，需要 --recursive", remote_ref);
            error!("{}", msg);
            return self.failed_report(&run_id, reference, start_time, vec![msg]);
        }

        let sink = Arc::new(OutcomeSink::new());
        let downloader = Arc::new(Downloader::new(
            storage.clone(),
            retry,
            self.config.transfer.verify_checksum,
            self.cancelled.clone(),
        ));

        let run_result = match handle.kind {
            RemoteKind::File => {
                if opts.recursive {
                    warn!("{} 指向文件，按单文件模式下载", remote_ref);
                }
                self.mirror_file(&handle, dest, &opts, &downloader, &sink)
                    .await
            }
            RemoteKind::Directory => {
                let dest_root = match remote_ref.basename() {
                    Some(name) => dest.join(name),
                    None => dest.to_path_buf(),
                };
                TreeSynchronizer::new(
                    storage,
                    downloader,
                    sink.clone(),
                    retry,
                    self.config.transfer.max_concurrent_transfers,
                    self.cancelled.clone(),
                )
                .run(&remote_ref.path, &dest_root)
                .await
            }
        };

        let mut errors = sink.failure_summaries().await;

        if let Err(e) = run_result {
            match e {
                MirrorError::Cancelled => {}
                e => {
                    error!("同步中止: {}", e);
                    errors.push(e.to_string());
                }
            }
        }

        if self.is_cancelled() {
            errors.push("同步已取消".to_string());
        }

        let mut status = sink.reduce();
        // 中止或取消的运行不能报告为完全成功
        if !errors.is_empty() && status == RunStatus::AllSucceeded {
            status = if sink.files_succeeded() + sink.files_skipped() > 0 {
                RunStatus::PartialFailure
            } else {
                RunStatus::TotalFailure
            };
        }

        let end_time = chrono::Utc::now().timestamp();

        info!(
            "同步完成: {} - 传输 {}, 跳过 {}, 失败 {}",
            reference,
            sink.files_succeeded(),
            sink.files_skipped(),
            sink.files_failed()
        );

        MirrorReport {
            runId: run_id,
            reference: reference.to_string(),
            startTime: start_time,
            endTime: end_time,
            status,
            filesTransferred: sink.files_succeeded() as u32,
            filesSkipped: sink.files_skipped() as u32,
            filesFailed: sink.files_failed() as u32,
            dirsCreated: sink.dirs_created() as u32,
            bytesTransferred: sink.bytes_transferred(),
            duration: (end_time - start_time) as u64,
            errors,
        }
    }

    /// 单文件下载
    async fn mirror_file(
        &self,
        handle: &RemoteHandle,
        dest: &Path,
        opts: &RunOptions,
        downloader: &Downloader,
        sink: &OutcomeSink,
    ) -> Result<(), MirrorError> {
        fs::create_dir_all(dest)
            .await
            .map_err(|e| MirrorError::from_local_io("创建目标目录失败", e))?;

        let file_name = opts
            .rename
            .clone()
            .unwrap_or_else(|| basename(&handle.reference.path).to_string());

        let task = TransferTask {
            remote_path: handle.reference.path.clone(),
            local_path: dest.join(file_name),
            expected_size: handle.meta.size,
            expected_checksum: handle.meta.checksum.clone(),
        };

        let outcome = downloader.download(&task).await?;
        sink.record(outcome).await;
        Ok(())
    }

    /// 解析阶段失败的报告（没有任何传输被尝试）
    fn failed_report(
        &self,
        run_id: &str,
        reference: &str,
        start_time: i64,
        errors: Vec<String>,
    ) -> MirrorReport {
        let end_time = chrono::Utc::now().timestamp();
        MirrorReport {
            runId: run_id.to_string(),
            reference: reference.to_string(),
            startTime: start_time,
            endTime: end_time,
            status: RunStatus::TotalFailure,
            filesTransferred: 0,
            filesSkipped: 0,
            filesFailed: 0,
            dirsCreated: 0,
            bytesTransferred: 0,
            duration: (end_time - start_time) as u64,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    fn config_with_local_system(name: &str, path: &Path) -> MirrorConfig {
        let mut config = MirrorConfig::default();
        config.systems.insert(
            name.to_string(),
            StorageConfig::local(path.to_str().unwrap()),
        );
        config.transfer.max_retries = 0;
        config.transfer.retry_base_delay_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_malformed_reference_fails_without_remote_call() {
        let engine = MirrorEngine::new(MirrorConfig::default());
        let dest = tempfile::tempdir().unwrap();

        let report = engine
            .run("not a reference", dest.path(), RunOptions::default())
            .await;
        assert_eq!(report.status, RunStatus::TotalFailure);
        assert_eq!(report.status.exit_code(), 2);
        assert_eq!(report.filesTransferred, 0);
        assert!(!report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_system_is_total_failure() {
        let engine = MirrorEngine::new(MirrorConfig::default());
        let dest = tempfile::tempdir().unwrap();

        let report = engine
            .run("nosuch://data", dest.path(), RunOptions::default())
            .await;
        assert_eq!(report.status, RunStatus::TotalFailure);
    }

    #[tokio::test]
    async fn test_directory_without_recursive_is_rejected() {
        let remote = tempfile::tempdir().unwrap();
        std::fs::create_dir(remote.path().join("data")).unwrap();

        let engine = MirrorEngine::new(config_with_local_system("fx", remote.path()));
        let dest = tempfile::tempdir().unwrap();

        let report = engine
            .run("fx://data", dest.path(), RunOptions::default())
            .await;
        assert_eq!(report.status, RunStatus::TotalFailure);
    }

    #[tokio::test]
    async fn test_single_file_download() {
        let remote = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("out.txt"), b"result").unwrap();

        let engine = MirrorEngine::new(config_with_local_system("fx", remote.path()));
        let dest = tempfile::tempdir().unwrap();

        let report = engine
            .run("fx://out.txt", dest.path(), RunOptions::default())
            .await;
        assert_eq!(report.status, RunStatus::AllSucceeded);
        assert_eq!(report.filesTransferred, 1);
        assert_eq!(
            std::fs::read(dest.path().join("out.txt")).unwrap(),
            b"result"
        );
    }

    #[tokio::test]
    async fn test_single_file_rename() {
        let remote = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("out.txt"), b"result").unwrap();

        let engine = MirrorEngine::new(config_with_local_system("fx", remote.path()));
        let dest = tempfile::tempdir().unwrap();

        let report = engine
            .run(
                "fx://out.txt",
                dest.path(),
                RunOptions {
                    recursive: false,
                    rename: Some("renamed.txt".to_string()),
                },
            )
            .await;
        assert_eq!(report.status, RunStatus::AllSucceeded);
        assert!(dest.path().join("renamed.txt").exists());
    }
}
