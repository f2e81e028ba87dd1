pub mod local;
pub mod s3;
pub mod webdav;

use crate::config::{StorageConfig, StorageType};
use crate::error::MirrorError;
use async_trait::async_trait;

pub use local::LocalStorage;
pub use s3::S3Storage;
pub use webdav::WebDavStorage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 目录列表中观察到的一个条目
#[derive(Debug, Clone)]
pub struct Entry {
    /// 相对系统根的路径，不带首尾斜杠
    pub path: String,
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
    /// 后端提供的内容哈希；etag 之类的非内容哈希不填
    pub checksum: Option<String>,
}

/// 元数据探测结果
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
    pub checksum: Option<String>,
}

/// 远程存储抽象接口
///
/// 调用方只消费三种只读能力：元数据探测、浅层列目录、整文件读取。
/// 递归由上层的遍历器负责。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 获取路径元数据；路径不存在返回 Ok(None)
    async fn stat(&self, path: &str) -> Result<Option<EntryMeta>, MirrorError>;

    /// 列出目录的直接子条目
    ///
    /// 空目录返回空列表而不是错误。分页由实现内部处理，
    /// 对调用方呈现为一个完整的列表。条目顺序不作约定。
    async fn list_dir(&self, path: &str) -> Result<Vec<Entry>, MirrorError>;

    /// 读取整个文件内容
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, MirrorError>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 计算内容哈希（BLAKE3，取前 16 字节的十六进制）
pub fn content_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    hash.to_hex()[..32].to_string()
}

/// 取路径的最后一段
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// 根据配置的存储系统创建存储实例
pub async fn create_storage(
    system: &str,
    config: &StorageConfig,
) -> Result<std::sync::Arc<dyn Storage>, MirrorError> {
    let missing = |field: &str| {
        MirrorError::InvalidReference(format!("存储系统 {} 缺少 {} 配置", system, field))
    };

    match config.typ {
        StorageType::Local => {
            let path = config.path.as_ref().ok_or_else(|| missing("path"))?;
            tracing::info!("初始化本地存储: {}", path);
            Ok(std::sync::Arc::new(LocalStorage::new(path)?) as std::sync::Arc<dyn Storage>)
        }
        StorageType::S3 => {
            let bucket = config.bucket.as_ref().ok_or_else(|| missing("bucket"))?;
            let region = config.region.as_ref().ok_or_else(|| missing("region"))?;
            let access_key = config.accessKey.as_ref().ok_or_else(|| missing("accessKey"))?;
            let secret_key = config.secretKey.as_ref().ok_or_else(|| missing("secretKey"))?;
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            Ok(std::sync::Arc::new(
                S3Storage::new(
                    bucket,
                    region,
                    access_key,
                    secret_key,
                    config.endpoint.clone(),
                    config.prefix.clone(),
                )
                .await?,
            ) as std::sync::Arc<dyn Storage>)
        }
        StorageType::WebDav => {
            let endpoint = config
                .webdavEndpoint
                .as_ref()
                .ok_or_else(|| missing("webdavEndpoint"))?;
            let username = config.username.as_ref().ok_or_else(|| missing("username"))?;
            let password = config.password.as_ref().ok_or_else(|| missing("password"))?;
            tracing::info!("初始化WebDAV存储: endpoint={}, root={:?}", endpoint, config.root);
            Ok(std::sync::Arc::new(
                WebDavStorage::new(endpoint, username, password, config.root.clone()).await?,
            ) as std::sync::Arc<dyn Storage>)
        }
    }
}
