use super::{Entry, EntryMeta, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::error::MirrorError;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

pub struct S3Storage {
    operator: Operator,
    name: String,
}

impl S3Storage {
    pub async fn new(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
        prefix: Option<String>,
    ) -> Result<Self, MirrorError> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(ref p) = prefix {
            builder = builder.root(p);
        }

        // 添加超时层
        let operator = Operator::new(builder)
            .map_err(|e| MirrorError::InvalidReference(format!("S3 配置无效: {}", e)))?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "s3://{}{}",
            bucket,
            prefix
                .as_deref()
                .map(|p| format!("/{}", p))
                .unwrap_or_default()
        );

        Ok(Self { operator, name })
    }

    fn dir_path(path: &str) -> String {
        if path.is_empty() || path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn stat(&self, path: &str) -> Result<Option<EntryMeta>, MirrorError> {
        match self.operator.stat(path).await {
            Ok(meta) => Ok(Some(EntryMeta {
                size: meta.content_length(),
                modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                is_dir: meta.is_dir(),
                // etag 不是内容哈希，不参与校验
                checksum: None,
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MirrorError::from_opendal(path, e)),
        }
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<Entry>, MirrorError> {
        let dir_path = Self::dir_path(path);

        let mut lister = self
            .operator
            .lister_with(&dir_path)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await
            .map_err(|e| MirrorError::from_opendal(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = lister
            .try_next()
            .await
            .map_err(|e| MirrorError::from_opendal(path, e))?
        {
            let entry_path = entry.path().trim_matches('/').to_string();

            // 跳过被列目录自身
            if entry_path.is_empty() || entry_path == dir_path.trim_matches('/') {
                continue;
            }

            let meta = entry.metadata();

            entries.push(Entry {
                path: entry_path,
                size: meta.content_length(),
                modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                is_dir: meta.is_dir(),
                checksum: None,
            });
        }

        Ok(entries)
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, MirrorError> {
        let data = self
            .operator
            .read(path)
            .await
            .map_err(|e| MirrorError::from_opendal(path, e))?;
        Ok(data.to_vec())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
