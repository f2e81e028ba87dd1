use super::{content_hash, Entry, EntryMeta, Storage};
use crate::error::MirrorError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

/// 本地目录作为远程系统使用（fixture 数据集、测试）
pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    pub fn new(path: &str) -> Result<Self, MirrorError> {
        let base_path = PathBuf::from(path);
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)
                .map_err(|e| MirrorError::from_remote_io(path, e))?;
        }
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    fn modified_secs(metadata: &std::fs::Metadata) -> i64 {
        metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64)
    }

    /// 文件的内容哈希；目录不计算
    async fn checksum_of(&self, full_path: &PathBuf) -> Option<String> {
        let data = fs::read(full_path).await.ok()?;
        Some(content_hash(&data))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn stat(&self, path: &str) -> Result<Option<EntryMeta>, MirrorError> {
        let full_path = self.resolve_path(path);

        match fs::metadata(&full_path).await {
            Ok(metadata) => {
                let checksum = if metadata.is_dir() {
                    None
                } else {
                    self.checksum_of(&full_path).await
                };

                Ok(Some(EntryMeta {
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                    modified_time: Self::modified_secs(&metadata),
                    is_dir: metadata.is_dir(),
                    checksum,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MirrorError::from_remote_io(path, e)),
        }
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<Entry>, MirrorError> {
        let full_path = self.resolve_path(path);

        let mut reader = fs::read_dir(&full_path)
            .await
            .map_err(|e| MirrorError::from_remote_io(path, e))?;

        let mut entries = Vec::new();
        while let Some(dir_entry) = reader
            .next_entry()
            .await
            .map_err(|e| MirrorError::from_remote_io(path, e))?
        {
            let name = dir_entry.file_name().to_string_lossy().to_string();
            let entry_path = if path.trim_matches('/').is_empty() {
                name.clone()
            } else {
                format!("{}/{}", path.trim_matches('/'), name)
            };

            let metadata = dir_entry
                .metadata()
                .await
                .map_err(|e| MirrorError::from_remote_io(&entry_path, e))?;

            let checksum = if metadata.is_dir() {
                None
            } else {
                self.checksum_of(&dir_entry.path()).await
            };

            entries.push(Entry {
                path: entry_path,
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified_time: Self::modified_secs(&metadata),
                is_dir: metadata.is_dir(),
                checksum,
            });
        }

        Ok(entries)
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, MirrorError> {
        let data = fs::read(self.resolve_path(path))
            .await
            .map_err(|e| MirrorError::from_remote_io(path, e))?;
        Ok(data)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
