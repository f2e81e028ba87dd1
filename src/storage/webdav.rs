use super::{Entry, EntryMeta, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::error::MirrorError;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

pub struct WebDavStorage {
    operator: Operator,
    name: String,
}

impl WebDavStorage {
    pub async fn new(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<String>,
    ) -> Result<Self, MirrorError> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        if let Some(ref r) = root {
            builder = builder.root(r);
        }

        let operator = Operator::new(builder)
            .map_err(|e| MirrorError::InvalidReference(format!("WebDAV 配置无效: {}", e)))?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.as_deref()
                .map(|r| format!("/{}", r.trim_start_matches('/')))
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
impl Storage for WebDavStorage {
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

            // 部分 WebDAV 服务器会把被列目录自身也返回
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
