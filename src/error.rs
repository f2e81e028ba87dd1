//! 错误类型定义
//!
//! 区分节点级错误（单个文件/目录失败，不影响其他条目）和
//! 运行级错误（本地磁盘故障、取消，终止整个同步）

use thiserror::Error;

/// 同步过程中可能出现的错误
#[derive(Error, Debug)]
pub enum MirrorError {
    /// 引用格式错误或存储系统未配置，不重试
    #[error("无效的远程引用: {0}")]
    InvalidReference(String),

    /// 远程路径不存在（或在解析后被删除）
    #[error("远程路径不存在: {0}")]
    NotFound(String),

    /// 远程端拒绝访问，不重试
    #[error("没有访问权限: {0}")]
    AccessDenied(String),

    /// 临时性网络错误，按策略重试
    #[error("临时网络错误: {0}")]
    Transient(String),

    /// 下载内容与列表元数据不一致
    #[error("完整性校验失败: {path} ({detail})")]
    Integrity { path: String, detail: String },

    /// 本地磁盘错误，终止整个运行
    #[error("本地 IO 错误: {0}")]
    LocalIo(String),

    /// 运行被取消
    #[error("操作已取消")]
    Cancelled,
}

impl MirrorError {
    /// 是否应该按退避策略重试
    pub fn is_transient(&self) -> bool {
        matches!(self, MirrorError::Transient(_))
    }

    /// 是否终止整个运行（而不是仅记录单个条目失败）
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, MirrorError::LocalIo(_) | MirrorError::Cancelled)
    }

    /// 将 opendal 错误映射为对应的错误类型
    pub fn from_opendal(path: &str, e: opendal::Error) -> Self {
        match e.kind() {
            opendal::ErrorKind::NotFound => MirrorError::NotFound(path.to_string()),
            opendal::ErrorKind::PermissionDenied => MirrorError::AccessDenied(path.to_string()),
            opendal::ErrorKind::RateLimited => {
                MirrorError::Transient(format!("{}: {}", path, e))
            }
            _ => MirrorError::Transient(format!("{}: {}", path, e)),
        }
    }

    /// 远程端为本地目录时的 IO 错误映射
    pub fn from_remote_io(path: &str, e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => MirrorError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => MirrorError::AccessDenied(path.to_string()),
            _ => MirrorError::Transient(format!("{}: {}", path, e)),
        }
    }

    /// 本地写入端的 IO 错误，一律视为运行级错误
    pub fn from_local_io(context: &str, e: std::io::Error) -> Self {
        MirrorError::LocalIo(format!("{}: {}", context, e))
    }

    pub fn integrity(path: impl Into<String>, detail: impl Into<String>) -> Self {
        MirrorError::Integrity {
            path: path.into(),
            detail: detail.into(),
        }
    }
}
