pub mod memory;
pub mod s3;

use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

pub use memory::MemoryStore;
pub use s3::S3Store;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 批量删除并发数
pub const DELETE_CONCURRENCY: usize = 8;
/// 传输分块大小，上传时也是 multipart 的分片大小
pub const TRANSFER_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// 上传数据流
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// 列表条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub key: String,
    pub is_dir: bool,
    /// 文件夹没有大小
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// 单个对象的元数据
#[derive(Debug, Clone, Default)]
pub struct StoreMeta {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    /// 用户自定义元数据（上传时附加的标签）
    pub metadata: HashMap<String, String>,
}

/// 批量删除中失败的 key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub error: String,
}

/// 对象存储接口，所有 key 都相对于 bucket 根
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 列出 prefix 下的条目
    ///
    /// `recursive == false` 时只返回直接子项，子文件夹以 `/` 结尾（等同 delimiter `/`）。
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<StoreEntry>>;

    /// 获取对象元数据，不存在时返回 None
    async fn head(&self, key: &str) -> Result<Option<StoreMeta>>;

    /// 读取对象的一段
    async fn read_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// 流式写入对象并附加用户元数据，返回写入的字节数
    async fn write_stream(
        &self,
        key: &str,
        stream: ChunkStream,
        metadata: &HashMap<String, String>,
    ) -> Result<u64>;

    /// 删除对象，对象不存在不视为错误
    async fn delete(&self, key: &str) -> Result<()>;

    /// 并发删除一批对象，返回失败的 key
    async fn delete_batch(&self, keys: &[String]) -> Vec<DeleteFailure> {
        futures::stream::iter(keys.iter().cloned())
            .map(|key| async move {
                let result = self.delete(&key).await;
                (key, result)
            })
            .buffer_unordered(DELETE_CONCURRENCY)
            .filter_map(|(key, result)| async move {
                result.err().map(|e| DeleteFailure {
                    key,
                    error: e.to_string(),
                })
            })
            .collect()
            .await
    }

    /// 分块下载对象到本地文件，返回字节数
    ///
    /// 先写入 `.part` 临时文件，完成后重命名覆盖目标；失败时目标文件保持不变。
    async fn download(&self, key: &str, destination: &Path) -> Result<u64> {
        let meta = self
            .head(key)
            .await?
            .ok_or_else(|| DataError::PathNotFound(key.to_string()))?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = part_path(destination);
        let copied: Result<u64> = async {
            let mut file = fs::File::create(&temp_path).await?;
            let mut offset = 0;
            while offset < meta.size {
                let length = TRANSFER_CHUNK_SIZE.min(meta.size - offset);
                let chunk = self.read_range(key, offset, length).await?;
                if chunk.is_empty() {
                    return Err(DataError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("{} ended at {} of {} bytes", key, offset, meta.size),
                    )));
                }
                file.write_all(&chunk).await?;
                offset += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(offset)
        }
        .await;

        match copied {
            Ok(size) => {
                fs::rename(&temp_path, destination).await?;
                Ok(size)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    /// 分块上传本地文件，返回字节数
    async fn upload(
        &self,
        source: &Path,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<u64> {
        let file = fs::File::open(source).await?;
        let stream = ReaderStream::with_capacity(file, TRANSFER_CHUNK_SIZE as usize)
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(DataError::from));
        self.write_stream(key, Box::pin(stream), metadata).await
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

fn part_path(destination: &Path) -> PathBuf {
    let mut temp_name = destination.as_os_str().to_os_string();
    temp_name.push(".part");
    PathBuf::from(temp_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_creates_parent_and_leaves_no_temp() {
        let store = MemoryStore::new("mem");
        store.insert("p/sub/b.txt", b"hello".to_vec());

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("sub").join("b.txt");
        let n = store.download("p/sub/b.txt", &dest).await.unwrap();

        assert_eq!(n, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert!(!dir.path().join("sub").join("b.txt.part").exists());
    }

    #[tokio::test]
    async fn test_upload_attaches_metadata() {
        let store = MemoryStore::new("mem");
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"abc").unwrap();

        let mut meta = HashMap::new();
        meta.insert("Source".to_string(), "SDK".to_string());
        store.upload(&src, "p/a.txt", &meta).await.unwrap();

        let head = store.head("p/a.txt").await.unwrap().unwrap();
        assert_eq!(head.size, 3);
        assert_eq!(head.metadata.get("Source").map(String::as_str), Some("SDK"));
    }

    #[tokio::test]
    async fn test_large_file_moves_in_chunks() {
        let store = MemoryStore::new("mem");
        let dir = TempDir::new().unwrap();
        let size = TRANSFER_CHUNK_SIZE as usize + 4096;
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let src = dir.path().join("big.bin");
        std::fs::write(&src, &data).unwrap();

        let uploaded = store.upload(&src, "p/big.bin", &HashMap::new()).await.unwrap();
        assert_eq!(uploaded, size as u64);
        assert!(store.chunks_written() >= 2);

        let dest = dir.path().join("copy.bin");
        let downloaded = store.download("p/big.bin", &dest).await.unwrap();
        assert_eq!(downloaded, size as u64);
        assert_eq!(store.read_count(), 2);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn test_failed_download_keeps_existing_file() {
        let store = MemoryStore::new("mem");
        store.insert("p/a.txt", b"remote".to_vec());
        store.fail_reads_for("p/a.txt");

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a.txt");
        std::fs::write(&dest, b"local").unwrap();

        assert!(store.download("p/a.txt", &dest).await.is_err());
        assert_eq!(std::fs::read(&dest).unwrap(), b"local");
        assert!(!dir.path().join("a.txt.part").exists());
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let store = MemoryStore::new("mem");
        let dir = TempDir::new().unwrap();
        let err = store
            .download("p/none", &dir.path().join("none"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_batch_reports_failures() {
        let store = MemoryStore::new("mem");
        store.insert("p/a", vec![1]);
        store.insert("p/b", vec![2]);
        store.fail_deletes_for("p/b");

        let keys = vec!["p/a".to_string(), "p/b".to_string()];
        let failures = store.delete_batch(&keys).await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "p/b");
        assert!(store.head("p/a").await.unwrap().is_none());
        assert!(store.head("p/b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_batch_larger_than_concurrency() {
        let store = MemoryStore::new("mem");
        let keys: Vec<String> = (0..DELETE_CONCURRENCY * 3)
            .map(|i| format!("p/{}", i))
            .collect();
        for key in &keys {
            store.insert(key, vec![0]);
        }

        assert!(store.delete_batch(&keys).await.is_empty());
        assert!(store.keys().is_empty());
    }
}
