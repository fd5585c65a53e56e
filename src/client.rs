//! 数据客户端：同步入口以及单文件操作

use crate::config::{expand_home, ClientConfig};
use crate::error::{DataError, Result};
use crate::path;
use crate::scanner::{matches_pattern, FileScanner, ScanConfig};
use crate::session::{s3_store_builder, CredentialSession, HttpSessionProvider};
use crate::store::DeleteFailure;
use crate::transfer::{
    Direction, TransferCallback, TransferContext, TransferFailure, TransferItem, WorkerPool,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_DOWNLOAD_THREADS: usize = 3;
pub const DEFAULT_UPLOAD_THREADS: usize = 1;

/// 远程条目描述，只由 [`DataClient::ls`] 产生
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataObject {
    pub name: String,
    /// 完整逻辑路径
    pub obj_path: String,
    pub folder: bool,
    /// 文件夹没有大小
    pub size: Option<u64>,
    /// ISO-8601 (UTC)
    pub last_modified: Option<String>,
}

/// sync 调用参数
#[derive(Clone, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub overwrite_existing: bool,
    /// 未指定时下载用 3，上传用 1
    pub threads: Option<usize>,
    pub callback: Option<TransferCallback>,
    /// 未指定时内部创建
    pub cancel: Option<CancellationToken>,
    /// 附加在客户端默认排除规则之后
    pub exclude_patterns: Vec<String>,
}

impl SyncOptions {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn overwrite_existing(mut self, overwrite: bool) -> Self {
        self.overwrite_existing = overwrite;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn callback(mut self, callback: TransferCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// 同步报告
#[derive(Debug)]
pub struct SyncReport {
    pub direction: Direction,
    pub dry_run: bool,
    /// 枚举出的条目数
    pub total: u64,
    pub transferred: u64,
    pub skipped: u64,
    pub failures: Vec<TransferFailure>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl SyncReport {
    /// 已处理的条目数
    pub fn processed(&self) -> u64 {
        self.transferred + self.skipped + self.failures.len() as u64
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// 删除结果，均为逻辑路径
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<DeleteFailure>,
}

/// EPIC 数据客户端
pub struct DataClient {
    session: Arc<CredentialSession>,
    download_threads: usize,
    upload_threads: usize,
    exclude_patterns: Vec<String>,
}

impl DataClient {
    pub fn new(session: Arc<CredentialSession>) -> Self {
        Self {
            session,
            download_threads: DEFAULT_DOWNLOAD_THREADS,
            upload_threads: DEFAULT_UPLOAD_THREADS,
            exclude_patterns: Vec::new(),
        }
    }

    /// 通过 REST 会话服务和 S3 建立客户端
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DataError::credential("no API token configured"))?;

        let provider = Arc::new(HttpSessionProvider::new(&config.api_url, token)?);
        let session = CredentialSession::new(provider, s3_store_builder(None))
            .with_refresh_margin(config.refresh_margin_secs);

        Ok(Self::new(Arc::new(session))
            .with_threads(config.download_threads, config.upload_threads)
            .with_exclude_patterns(config.exclude_patterns.clone()))
    }

    pub fn with_threads(mut self, download: usize, upload: usize) -> Self {
        self.download_threads = download.max(1);
        self.upload_threads = upload.max(1);
        self
    }

    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    pub fn session(&self) -> &Arc<CredentialSession> {
        &self.session
    }

    /// 在本地目录和远程路径之间同步
    ///
    /// source 和 target 必须恰好有一个是 `epic://` 路径，方向由此决定。
    /// 所有条目在 worker 启动前一次性枚举完毕。单个条目失败记录在报告中。
    pub async fn sync(&self, source: &str, target: &str, options: SyncOptions) -> Result<SyncReport> {
        let direction = match (path::is_remote(source), path::is_remote(target)) {
            (true, false) => Direction::Download,
            (false, true) => Direction::Upload,
            _ => {
                return Err(DataError::AmbiguousPath {
                    source_path: source.to_string(),
                    target_path: target.to_string(),
                })
            }
        };

        let start = Instant::now();
        let cancel = options
            .cancel
            .clone()
            .unwrap_or_else(CancellationToken::new);
        let mut excludes = self.exclude_patterns.clone();
        excludes.extend(options.exclude_patterns.iter().cloned());

        info!(
            "开始同步 ({}): {} -> {} (dry_run={}, overwrite={})",
            direction, source, target, options.dry_run, options.overwrite_existing
        );

        let (local_root, remote_prefix, items, threads) = match direction {
            Direction::Download => {
                let local_root = expand_home(target);
                if !options.dry_run {
                    fs::create_dir_all(&local_root).await?;
                }
                let (prefix, items) = self.enumerate_remote(source, &excludes).await?;
                let threads = options.threads.unwrap_or(self.download_threads);
                (local_root, prefix, items, threads)
            }
            Direction::Upload => {
                let local_root = expand_home(source);
                if !local_root.is_dir() {
                    return Err(DataError::invalid_path(format!(
                        "source directory does not exist: {}",
                        local_root.display()
                    )));
                }
                let conn = self.session.connect().await?;
                let prefix = path::to_store_key(&path::ensure_folder(target), &conn.key_prefix)?;
                let files = FileScanner::with_config(ScanConfig {
                    exclude_patterns: excludes,
                })
                .with_cancel(cancel.clone())
                .scan_local(&local_root)
                .await?;
                let items: Vec<TransferItem> =
                    files.into_iter().map(TransferItem::Upload).collect();
                let threads = options.threads.unwrap_or(self.upload_threads);
                (local_root, prefix, items, threads)
            }
        };

        let total = items.len() as u64;
        let ctx = Arc::new(TransferContext {
            direction,
            session: self.session.clone(),
            local_root,
            remote_prefix,
            dry_run: options.dry_run,
            overwrite_existing: options.overwrite_existing,
            callback: options.callback.clone(),
        });

        let pool = WorkerPool::new(threads, cancel.clone()).run(ctx, items).await?;

        let report = SyncReport {
            direction,
            dry_run: options.dry_run,
            total,
            transferred: pool.transferred,
            skipped: pool.skipped,
            failures: pool.failures,
            cancelled: cancel.is_cancelled(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "同步结束 ({}): 共 {} 个, 传输 {}, 跳过 {}, 失败 {}{}",
            direction,
            report.total,
            report.transferred,
            report.skipped,
            report.failures.len(),
            if report.cancelled { " (已取消)" } else { "" }
        );
        Ok(report)
    }

    /// 列出远程前缀下的全部 key，作为下载条目
    async fn enumerate_remote(
        &self,
        source: &str,
        excludes: &[String],
    ) -> Result<(String, Vec<TransferItem>)> {
        let conn = self.session.connect().await?;
        let prefix = path::to_store_key(&path::ensure_folder(source), &conn.key_prefix)?;

        let entries = conn.store.list(&prefix, true).await?;
        if entries.is_empty() {
            return Err(DataError::PathNotFound(source.to_string()));
        }

        let items = entries
            .into_iter()
            .filter(|entry| entry.key != prefix)
            .filter(|entry| {
                let relative = entry.key.strip_prefix(&prefix).unwrap_or(&entry.key);
                let excluded = excludes.iter().any(|p| matches_pattern(relative, p));
                if excluded {
                    debug!("排除: {}", entry.key);
                }
                !excluded
            })
            .map(|entry| TransferItem::Download(entry.key))
            .collect();

        Ok((prefix, items))
    }

    /// 列出文件夹的直接子项，文件夹在前
    pub async fn ls(&self, epic_path: &str) -> Result<Vec<DataObject>> {
        let conn = self.session.connect().await?;
        let prefix = path::to_store_key(&path::ensure_folder(epic_path), &conn.key_prefix)?;

        let entries = conn.store.list(&prefix, false).await?;
        // 只有目录标记的空文件夹
        if entries.is_empty() && conn.store.head(&prefix).await?.is_none() {
            return Err(DataError::PathNotFound(epic_path.to_string()));
        }

        let (folders, files): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.is_dir);
        Ok(folders
            .into_iter()
            .chain(files)
            .map(|entry| DataObject {
                name: path::entry_name(&entry.key).to_string(),
                obj_path: path::to_logical_path(&entry.key, &conn.key_prefix),
                folder: entry.is_dir,
                size: entry.size,
                last_modified: (!entry.is_dir)
                    .then_some(entry.last_modified)
                    .flatten()
                    .map(|t| t.to_rfc3339()),
            })
            .collect())
    }

    /// 读取文件的自定义元数据
    pub async fn get_file_meta_data(&self, epic_path: &str) -> Result<HashMap<String, String>> {
        let key = self.file_key(epic_path).await?;
        let conn = self.session.connect().await?;
        conn.store
            .head(&key)
            .await?
            .map(|meta| meta.metadata)
            .ok_or_else(|| DataError::PathNotFound(epic_path.to_string()))
    }

    /// 下载单个文件，返回本地文件路径
    ///
    /// destination 是已存在的目录（或以路径分隔符结尾）时，文件名沿用远程名称。
    pub async fn download_file(&self, epic_path: &str, destination: &str) -> Result<PathBuf> {
        let key = self.file_key(epic_path).await?;
        let conn = self.session.connect().await?;

        let mut local = expand_home(destination);
        if destination.ends_with(std::path::MAIN_SEPARATOR) || destination.ends_with('/') {
            fs::create_dir_all(&local).await?;
        }
        if local.is_dir() {
            local.push(path::entry_name(epic_path));
        }

        let size = conn.store.download(&key, &local).await?;
        info!("已下载 {} -> {} ({} bytes)", epic_path, local.display(), size);
        Ok(local)
    }

    /// 上传单个文件，返回远程逻辑路径
    ///
    /// epic_path 是文件夹时追加本地文件名。
    pub async fn upload_file(&self, file: &Path, epic_path: &str) -> Result<String> {
        let logical = if path::is_folder(epic_path) {
            let name = file.file_name().ok_or_else(|| {
                DataError::invalid_path(format!("{} has no file name", file.display()))
            })?;
            format!("{}{}", epic_path, name.to_string_lossy())
        } else {
            epic_path.to_string()
        };

        let conn = self.session.connect().await?;
        let key = path::to_store_key(&logical, &conn.key_prefix)?;
        let size = conn.store.upload(file, &key, &conn.upload_metadata).await?;
        info!("已上传 {} -> {} ({} bytes)", file.display(), logical, size);
        Ok(logical)
    }

    /// 删除文件，或文件夹下的所有对象
    ///
    /// dry_run 时只返回将被删除的路径。
    pub async fn delete(&self, epic_path: &str, dry_run: bool) -> Result<DeleteReport> {
        let conn = self.session.connect().await?;

        if !path::is_folder(epic_path) {
            let key = path::to_store_key(epic_path, &conn.key_prefix)?;
            if !dry_run {
                conn.store.delete(&key).await?;
            }
            return Ok(DeleteReport {
                deleted: vec![epic_path.to_string()],
                failed: Vec::new(),
            });
        }

        let prefix = path::to_store_key(epic_path, &conn.key_prefix)?;
        let keys: Vec<String> = conn
            .store
            .list(&prefix, true)
            .await?
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        if keys.is_empty() {
            return Err(DataError::PathNotFound(epic_path.to_string()));
        }

        let failures = if dry_run {
            Vec::new()
        } else {
            conn.store.delete_batch(&keys).await
        };

        let failed: Vec<DeleteFailure> = failures
            .into_iter()
            .map(|f| {
                warn!("删除失败 {}: {}", f.key, f.error);
                DeleteFailure {
                    key: path::to_logical_path(&f.key, &conn.key_prefix),
                    error: f.error,
                }
            })
            .collect();
        let deleted = keys
            .iter()
            .map(|key| path::to_logical_path(key, &conn.key_prefix))
            .filter(|logical| !failed.iter().any(|f| &f.key == logical))
            .collect();

        Ok(DeleteReport { deleted, failed })
    }

    /// 单文件操作的 key，拒绝文件夹路径
    async fn file_key(&self, epic_path: &str) -> Result<String> {
        if path::is_folder(epic_path) {
            return Err(DataError::invalid_path(format!(
                "expected a file path, got folder: {}",
                epic_path
            )));
        }
        let conn = self.session.connect().await?;
        path::to_store_key(epic_path, &conn.key_prefix)
    }
}
