use super::{
    ChunkStream, ObjectStore, StoreEntry, StoreMeta, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS,
    TRANSFER_CHUNK_SIZE,
};
use crate::error::{DataError, Result};
use crate::session::SessionDetails;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::layers::{RetryLayer, TimeoutLayer};
use opendal::Operator;
use std::collections::HashMap;
use std::time::Duration;

/// 基于 OpenDAL 的 S3 存储，凭证来自会话服务签发的临时 token
pub struct S3Store {
    operator: Operator,
    name: String,
}

impl S3Store {
    pub fn new(details: &SessionDetails, endpoint: Option<&str>) -> Result<Self> {
        use opendal::services::S3;

        // 只使用会话凭证，不读取环境变量或 ~/.aws 配置
        let mut builder = S3::default()
            .bucket(&details.bucket)
            .region(&details.region)
            .access_key_id(&details.access_key)
            .secret_access_key(&details.secret_key)
            .session_token(&details.session_token)
            .disable_config_load();

        if let Some(ep) = endpoint.filter(|ep| !ep.is_empty()) {
            builder = builder.endpoint(ep);
        }

        // 重试由存储客户端负责；超时层在最外侧
        let operator = Operator::new(builder)?
            .layer(RetryLayer::new())
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!("s3://{}/{}", details.bucket, details.key_prefix);

        Ok(Self { operator, name })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<StoreEntry>> {
        let mut entries = Vec::new();

        let mut lister = self
            .operator
            .lister_with(prefix)
            .recursive(recursive)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let key = entry.path().trim_start_matches('/').to_string();

            // 非递归列表会返回前缀自身
            if key.is_empty() || (!recursive && key == prefix) {
                continue;
            }

            let meta = entry.metadata();
            let is_dir = meta.is_dir();

            entries.push(StoreEntry {
                key,
                is_dir,
                size: (!is_dir).then(|| meta.content_length()),
                last_modified: meta.last_modified(),
            });
        }

        Ok(entries)
    }

    async fn head(&self, key: &str) -> Result<Option<StoreMeta>> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(Some(StoreMeta {
                size: meta.content_length(),
                last_modified: meta.last_modified(),
                metadata: meta.user_metadata().cloned().unwrap_or_default(),
            })),
            Err(e) => {
                let e = DataError::from(e);
                if e.is_not_found() {
                    Ok(None)
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn read_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let data = self
            .operator
            .read_with(key)
            .range(offset..offset + length)
            .await?;
        Ok(data.to_vec())
    }

    async fn write_stream(
        &self,
        key: &str,
        mut stream: ChunkStream,
        metadata: &HashMap<String, String>,
    ) -> Result<u64> {
        // 超过一个分块时走 multipart 上传
        let mut writer = self
            .operator
            .writer_with(key)
            .chunk(TRANSFER_CHUNK_SIZE as usize)
            .user_metadata(metadata.clone())
            .await?;

        let written: Result<u64> = async {
            let mut total = 0u64;
            while let Some(chunk) = stream.try_next().await? {
                total += chunk.len() as u64;
                writer.write(chunk).await?;
            }
            Ok(total)
        }
        .await;

        match written {
            Ok(total) => {
                writer.close().await?;
                Ok(total)
            }
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    tracing::warn!("取消上传 {} 失败: {}", key, abort_err);
                }
                Err(e)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // S3 删除不存在的文件不会报错
        self.operator.delete(key).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
