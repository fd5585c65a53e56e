//! 传输 worker 池
//!
//! 固定数量的 worker 共享一个工作队列。每个 worker 循环执行
//! 等待条目 -> 处理 -> 回调，队列耗尽（或超过轮询超时）或收到取消信号后退出。
//! 单个条目失败只记录到报告中，不影响其他条目。

use crate::error::{DataError, Result};
use crate::path;
use crate::session::{Connection, CredentialSession};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 队列为空时 worker 的最长等待时间
pub const QUEUE_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// 队列中的一个工作单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferItem {
    /// 待下载的存储 key
    Download(String),
    /// 待上传的本地文件绝对路径
    Upload(PathBuf),
}

impl std::fmt::Display for TransferItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferItem::Download(key) => write!(f, "{}", key),
            TransferItem::Upload(path) => write!(f, "{}", path.display()),
        }
    }
}

/// 单个条目的处理结果
///
/// 远程一侧总是逻辑路径 (`epic://...`)，本地一侧总是文件系统路径。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub source: String,
    pub destination: String,
    /// false 表示已是最新、被跳过或处于演练模式
    pub transferred: bool,
    pub dry_run: bool,
}

/// 每处理完一个条目调用一次
pub type TransferCallback = Arc<dyn Fn(&TransferResult) + Send + Sync>;

/// 处理失败的条目
#[derive(Debug)]
pub struct TransferFailure {
    pub item: String,
    pub error: DataError,
}

/// 一次 sync 调用中所有 worker 共享的只读上下文
pub struct TransferContext {
    pub direction: Direction,
    pub session: Arc<CredentialSession>,
    /// 本地同步根目录
    pub local_root: PathBuf,
    /// 远程同步根目录对应的存储 key 前缀（以 `/` 结尾）
    pub remote_prefix: String,
    pub dry_run: bool,
    pub overwrite_existing: bool,
    pub callback: Option<TransferCallback>,
}

/// worker 池的汇总结果
#[derive(Debug, Default)]
pub struct PoolReport {
    pub transferred: u64,
    pub skipped: u64,
    pub failures: Vec<TransferFailure>,
}

impl PoolReport {
    pub fn processed(&self) -> u64 {
        self.transferred + self.skipped + self.failures.len() as u64
    }
}

#[derive(Default)]
struct PoolStats {
    transferred: AtomicU64,
    skipped: AtomicU64,
    failures: StdMutex<Vec<TransferFailure>>,
}

impl PoolStats {
    fn record(&self, result: &TransferResult) {
        if result.transferred {
            self.transferred.fetch_add(1, Ordering::Relaxed);
        } else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn fail(&self, failure: TransferFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    fn into_report(self) -> PoolReport {
        PoolReport {
            transferred: self.transferred.into_inner(),
            skipped: self.skipped.into_inner(),
            failures: self
                .failures
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

type SharedQueue = Arc<Mutex<mpsc::Receiver<TransferItem>>>;

/// 固定大小的 worker 池
pub struct WorkerPool {
    workers: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(workers: usize, cancel: CancellationToken) -> Self {
        Self {
            workers: workers.max(1),
            cancel,
        }
    }

    /// 处理全部条目，直到队列耗尽或被取消
    ///
    /// 条目在任何 worker 启动前全部入队。worker 异常退出时返回 [`DataError::Worker`]。
    pub async fn run(
        &self,
        ctx: Arc<TransferContext>,
        items: Vec<TransferItem>,
    ) -> Result<PoolReport> {
        let total = items.len();
        let (tx, rx) = mpsc::channel(total.max(1));
        for item in items {
            tx.try_send(item)
                .map_err(|e| DataError::Worker(format!("failed to enqueue item: {}", e)))?;
        }
        drop(tx);

        let queue: SharedQueue = Arc::new(Mutex::new(rx));
        let stats = Arc::new(PoolStats::default());
        let mut workers = JoinSet::new();

        info!(
            "启动 {} 个 {} worker, 共 {} 个条目",
            self.workers, ctx.direction, total
        );

        for id in 0..self.workers {
            workers.spawn(worker_loop(
                id,
                ctx.clone(),
                queue.clone(),
                self.cancel.clone(),
                QUEUE_POLL_TIMEOUT,
                stats.clone(),
            ));
        }

        let mut crashed = Vec::new();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("worker 异常退出: {}", e);
                crashed.push(e.to_string());
            }
        }

        if !crashed.is_empty() {
            return Err(DataError::Worker(crashed.join("; ")));
        }

        let stats = Arc::try_unwrap(stats)
            .map_err(|_| DataError::Worker("worker statistics still shared".to_string()))?;
        Ok(stats.into_report())
    }
}

async fn worker_loop(
    id: usize,
    ctx: Arc<TransferContext>,
    queue: SharedQueue,
    cancel: CancellationToken,
    poll_timeout: Duration,
    stats: Arc<PoolStats>,
) {
    loop {
        let item = {
            let mut rx = queue.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                received = tokio::time::timeout(poll_timeout, rx.recv()) => received.ok().flatten(),
            }
        };

        let Some(item) = item else {
            debug!("worker {} 退出", id);
            return;
        };

        match process_item(&ctx, &item).await {
            Ok(result) => {
                debug!(
                    "worker {}: {} -> {} (transferred={}, dry_run={})",
                    id, result.source, result.destination, result.transferred, result.dry_run
                );
                stats.record(&result);
                if let Some(callback) = &ctx.callback {
                    callback(&result);
                }
            }
            Err(error) => {
                warn!("worker {}: 处理 {} 失败: {}", id, item, error);
                stats.fail(TransferFailure {
                    item: item.to_string(),
                    error,
                });
            }
        }
    }
}

async fn process_item(ctx: &TransferContext, item: &TransferItem) -> Result<TransferResult> {
    // 每个条目前取一次连接，凭证刷新由会话统一处理
    let conn = ctx.session.connect().await?;
    match item {
        TransferItem::Download(key) => download_key(ctx, &conn, key).await,
        TransferItem::Upload(file) => upload_file(ctx, &conn, file).await,
    }
}

async fn download_key(
    ctx: &TransferContext,
    conn: &Connection,
    key: &str,
) -> Result<TransferResult> {
    let relative = key.strip_prefix(&ctx.remote_prefix).ok_or_else(|| {
        DataError::invalid_path(format!("{} is not under {}", key, ctx.remote_prefix))
    })?;
    let local = path::local_path_for(&ctx.local_root, relative)?;

    let outcome = |transferred: bool| TransferResult {
        source: path::to_logical_path(key, &conn.key_prefix),
        destination: local.display().to_string(),
        transferred,
        dry_run: ctx.dry_run,
    };

    // 目录标记
    if path::is_folder(key) {
        if !ctx.dry_run {
            ensure_dir(&local).await?;
        }
        return Ok(outcome(false));
    }

    if fs::try_exists(&local).await? {
        if !ctx.overwrite_existing {
            return Ok(outcome(false));
        }
        let local_modified = modified_time(&local).await?;
        let remote = conn
            .store
            .head(key)
            .await?
            .ok_or_else(|| DataError::PathNotFound(key.to_string()))?;
        // 旧文件由下载完成后的重命名替换
        if !is_strictly_newer(remote.last_modified, Some(local_modified)) {
            return Ok(outcome(false));
        }
    }

    if let Some(parent) = local.parent() {
        if !ctx.dry_run {
            ensure_dir(parent).await?;
        }
    }

    if ctx.dry_run {
        return Ok(outcome(false));
    }

    conn.store.download(key, &local).await?;
    Ok(outcome(true))
}

async fn upload_file(
    ctx: &TransferContext,
    conn: &Connection,
    file: &Path,
) -> Result<TransferResult> {
    let relative = path::relative_key_for(&ctx.local_root, file)?;
    let key = format!("{}{}", ctx.remote_prefix, relative);
    let local_modified = modified_time(file).await?;

    let upload = match conn.store.head(&key).await? {
        None => true,
        Some(remote) if ctx.overwrite_existing => {
            is_strictly_newer(Some(local_modified), remote.last_modified)
        }
        Some(_) => false,
    };

    if upload && !ctx.dry_run {
        conn.store
            .upload(file, &key, &conn.upload_metadata)
            .await?;
    }

    Ok(TransferResult {
        source: file.display().to_string(),
        destination: path::to_logical_path(&key, &conn.key_prefix),
        transferred: upload && !ctx.dry_run,
        dry_run: ctx.dry_run,
    })
}

/// 创建目录，已存在（包括被其他 worker 抢先创建）不视为错误
async fn ensure_dir(dir: &Path) -> Result<()> {
    match fs::create_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn modified_time(file: &Path) -> Result<DateTime<Utc>> {
    let modified = fs::metadata(file).await?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// candidate 是否严格晚于 reference（按秒比较，对象存储只保留秒级精度）
///
/// candidate 未知时视为不更新；reference 未知时视为更新。
pub fn is_strictly_newer(
    candidate: Option<DateTime<Utc>>,
    reference: Option<DateTime<Utc>>,
) -> bool {
    match (candidate, reference) {
        (Some(c), Some(r)) => c.timestamp() > r.timestamp(),
        (Some(_), None) => true,
        (None, _) => false,
    }
}
