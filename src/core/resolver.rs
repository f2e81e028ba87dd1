//! 远程路径类型探测
//!
//! 一次元数据往返确定引用指向文件还是目录；kind 一经确定不再变化

use crate::core::reference::RemoteRef;
use crate::core::retry::RetryPolicy;
use crate::error::MirrorError;
use crate::storage::{EntryMeta, Storage};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::debug;

/// 远程条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    File,
    Directory,
}

/// 已解析的远程句柄
#[derive(Debug, Clone)]
pub struct RemoteHandle {
    pub reference: RemoteRef,
    pub kind: RemoteKind,
    pub meta: EntryMeta,
}

pub struct PathResolver {
    storage: Arc<dyn Storage>,
    retry: RetryPolicy,
}

impl PathResolver {
    pub fn new(storage: Arc<dyn Storage>, retry: RetryPolicy) -> Self {
        Self { storage, retry }
    }

    /// 探测引用并返回句柄
    ///
    /// 对象存储后端的目录可能需要以斜杠结尾的形式探测，
    /// 首次未命中时再以目录形式探测一次。
    pub async fn resolve(
        &self,
        reference: &RemoteRef,
        cancelled: &AtomicBool,
    ) -> Result<RemoteHandle, MirrorError> {
        if reference.is_root() {
            return Ok(RemoteHandle {
                reference: reference.clone(),
                kind: RemoteKind::Directory,
                meta: EntryMeta {
                    size: 0,
                    modified_time: 0,
                    is_dir: true,
                    checksum: None,
                },
            });
        }

        let path = reference.path.clone();
        let meta = self
            .retry
            .run(cancelled, || self.storage.stat(&path))
            .await?;

        if let Some(meta) = meta {
            debug!(
                "解析完成: {} -> {}",
                reference,
                if meta.is_dir { "目录" } else { "文件" }
            );
            return Ok(RemoteHandle {
                reference: reference.clone(),
                kind: if meta.is_dir {
                    RemoteKind::Directory
                } else {
                    RemoteKind::File
                },
                meta,
            });
        }

        // 以目录形式再探测一次
        let dir_probe = format!("{}/", reference.path);
        let meta = self
            .retry
            .run(cancelled, || self.storage.stat(&dir_probe))
            .await?;

        match meta {
            Some(meta) if meta.is_dir => {
                debug!("解析完成: {} -> 目录", reference);
                Ok(RemoteHandle {
                    reference: reference.clone(),
                    kind: RemoteKind::Directory,
                    meta,
                })
            }
            _ => Err(MirrorError::NotFound(reference.to_string())),
        }
    }
}
