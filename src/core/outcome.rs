#![allow(non_snake_case)]

//! 结果聚合
//!
//! 每个条目的终态在完成时记录一次，之后不再修改；
//! 聚合器独占持有整个运行的结果集合

use crate::error::MirrorError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// 单个条目的终态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Succeeded,
    Skipped(String),
    Failed(String),
}

/// 一次传输（或一个目录节点）的结果
#[derive(Debug, Clone)]
pub struct Outcome {
    pub path: String,
    pub bytes: u64,
    pub status: OutcomeStatus,
}

impl Outcome {
    pub fn succeeded(path: impl Into<String>, bytes: u64) -> Self {
        Self {
            path: path.into(),
            bytes,
            status: OutcomeStatus::Succeeded,
        }
    }

    pub fn skipped(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            bytes: 0,
            status: OutcomeStatus::Skipped(reason.into()),
        }
    }

    pub fn failed(path: impl Into<String>, error: &MirrorError) -> Self {
        Self {
            path: path.into(),
            bytes: 0,
            status: OutcomeStatus::Failed(error.to_string()),
        }
    }
}

/// 整个运行的归约结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    AllSucceeded,
    PartialFailure,
    TotalFailure,
}

impl RunStatus {
    /// 映射为进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::AllSucceeded => 0,
            RunStatus::PartialFailure => 1,
            RunStatus::TotalFailure => 2,
        }
    }
}

/// 结果收集器
///
/// 并发追加安全：计数器用原子量，明细列表加锁，不会丢失更新
#[derive(Debug, Default)]
pub struct OutcomeSink {
    outcomes: RwLock<Vec<Outcome>>,
    files_succeeded: AtomicU64,
    files_skipped: AtomicU64,
    files_failed: AtomicU64,
    bytes_transferred: AtomicU64,
    dirs_created: AtomicU64,
}

impl OutcomeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个条目的终态
    pub async fn record(&self, outcome: Outcome) {
        match &outcome.status {
            OutcomeStatus::Succeeded => {
                self.files_succeeded.fetch_add(1, Ordering::Relaxed);
                self.bytes_transferred
                    .fetch_add(outcome.bytes, Ordering::Relaxed);
            }
            OutcomeStatus::Skipped(_) => {
                self.files_skipped.fetch_add(1, Ordering::Relaxed);
            }
            OutcomeStatus::Failed(_) => {
                self.files_failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut outcomes = self.outcomes.write().await;
        outcomes.push(outcome);
    }

    pub fn add_dir_created(&self) {
        self.dirs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn files_succeeded(&self) -> u64 {
        self.files_succeeded.load(Ordering::Relaxed)
    }

    pub fn files_skipped(&self) -> u64 {
        self.files_skipped.load(Ordering::Relaxed)
    }

    pub fn files_failed(&self) -> u64 {
        self.files_failed.load(Ordering::Relaxed)
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    pub fn dirs_created(&self) -> u64 {
        self.dirs_created.load(Ordering::Relaxed)
    }

    /// 失败条目的描述列表（用于报告）
    pub async fn failure_summaries(&self) -> Vec<String> {
        let outcomes = self.outcomes.read().await;
        outcomes
            .iter()
            .filter_map(|o| match &o.status {
                OutcomeStatus::Failed(reason) => Some(format!("{}: {}", o.path, reason)),
                _ => None,
            })
            .collect()
    }

    /// 归约为整个运行的状态
    ///
    /// 没有任何失败即视为成功（空目录运行也算成功）；
    /// 有失败但同时有成功或跳过的条目时为部分失败
    pub fn reduce(&self) -> RunStatus {
        let failed = self.files_failed();
        if failed == 0 {
            return RunStatus::AllSucceeded;
        }
        if self.files_succeeded() + self.files_skipped() > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::TotalFailure
        }
    }
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorReport {
    pub runId: String,
    pub reference: String,
    pub startTime: i64,
    pub endTime: i64,
    pub status: RunStatus,
    pub filesTransferred: u32,
    pub filesSkipped: u32,
    pub filesFailed: u32,
    pub dirsCreated: u32,
    pub bytesTransferred: u64,
    pub duration: u64,
    pub errors: Vec<String>,
}
