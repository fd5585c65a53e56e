//! 进程内对象存储，供测试和离线演练使用

use super::{ChunkStream, ObjectStore, StoreEntry, StoreMeta};
use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct MemObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, MemObject>,
    failing_deletes: HashSet<String>,
    failing_reads: HashSet<String>,
    puts: u64,
    reads: u64,
    chunks_written: u64,
}

/// 以 BTreeMap 保存对象，列表顺序与 S3 一致（按 key 字典序）
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    name: String,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            name: format!("memory://{}", name),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 以当前时间写入对象
    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.insert_at(key, data, Utc::now());
    }

    /// 以指定修改时间写入对象
    pub fn insert_at(&self, key: &str, data: Vec<u8>, last_modified: DateTime<Utc>) {
        self.lock().objects.insert(
            key.to_string(),
            MemObject {
                data,
                last_modified,
                metadata: HashMap::new(),
            },
        );
    }

    /// 让指定 key 的删除失败
    pub fn fail_deletes_for(&self, key: &str) {
        self.lock().failing_deletes.insert(key.to_string());
    }

    /// 让指定 key 的读取失败
    pub fn fail_reads_for(&self, key: &str) {
        self.lock().failing_reads.insert(key.to_string());
    }

    /// 当前所有 key
    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// 对象内容
    pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).map(|o| o.data.clone())
    }

    /// 累计 put 次数
    pub fn put_count(&self) -> u64 {
        self.lock().puts
    }

    /// 累计分段读取次数
    pub fn read_count(&self) -> u64 {
        self.lock().reads
    }

    /// 累计写入的数据块数
    pub fn chunks_written(&self) -> u64 {
        self.lock().chunks_written
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<StoreEntry>> {
        let inner = self.lock();
        let mut entries = Vec::new();
        let mut folders = BTreeSet::new();

        for (key, obj) in inner.objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };

            if !recursive {
                // 前缀自身的目录标记不算子项
                if rest.is_empty() {
                    continue;
                }
                if let Some(idx) = rest.find('/') {
                    folders.insert(format!("{}{}", prefix, &rest[..=idx]));
                    continue;
                }
            }

            let is_dir = key.ends_with('/');
            entries.push(StoreEntry {
                key: key.clone(),
                is_dir,
                size: (!is_dir).then_some(obj.data.len() as u64),
                last_modified: Some(obj.last_modified),
            });
        }

        entries.extend(folders.into_iter().map(|key| StoreEntry {
            key,
            is_dir: true,
            size: None,
            last_modified: None,
        }));
        Ok(entries)
    }

    async fn head(&self, key: &str) -> Result<Option<StoreMeta>> {
        Ok(self.lock().objects.get(key).map(|obj| StoreMeta {
            size: obj.data.len() as u64,
            last_modified: Some(obj.last_modified),
            metadata: obj.metadata.clone(),
        }))
    }

    async fn read_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut inner = self.lock();
        inner.reads += 1;
        if inner.failing_reads.contains(key) {
            return Err(DataError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                format!("read interrupted: {}", key),
            )));
        }
        let obj = inner
            .objects
            .get(key)
            .ok_or_else(|| DataError::PathNotFound(key.to_string()))?;
        let len = obj.data.len();
        let start = usize::try_from(offset).unwrap_or(len).min(len);
        let end = start
            .saturating_add(usize::try_from(length).unwrap_or(usize::MAX))
            .min(len);
        Ok(obj.data[start..end].to_vec())
    }

    async fn write_stream(
        &self,
        key: &str,
        stream: ChunkStream,
        metadata: &HashMap<String, String>,
    ) -> Result<u64> {
        let chunks: Vec<Vec<u8>> = stream.try_collect().await?;
        let data = chunks.concat();
        let size = data.len() as u64;

        let mut inner = self.lock();
        inner.puts += 1;
        inner.chunks_written += chunks.len() as u64;
        inner.objects.insert(
            key.to_string(),
            MemObject {
                data,
                last_modified: Utc::now(),
                metadata: metadata.clone(),
            },
        );
        Ok(size)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing_deletes.contains(key) {
            return Err(DataError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("delete denied: {}", key),
            )));
        }
        inner.objects.remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
