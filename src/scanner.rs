use crate::error::{DataError, Result};
use crate::path::relative_key_for;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 本地扫描配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 排除规则（glob patterns），默认不排除任何文件
    pub exclude_patterns: Vec<String>,
}

/// 本地目录扫描器
#[derive(Debug, Clone, Default)]
pub struct FileScanner {
    config: ScanConfig,
    cancel: Option<CancellationToken>,
}

impl FileScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ScanConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// 扫描过程中检查取消标志
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// 检查路径是否应该被排除
    fn should_exclude(&self, relative: &str) -> bool {
        self.config
            .exclude_patterns
            .iter()
            .any(|pattern| matches_pattern(relative, pattern))
    }

    /// 递归列出 root 下的所有文件（不含目录）
    ///
    /// 指向文件的符号链接按文件处理，指向目录的符号链接不展开。
    ///
    /// 被取消时返回已扫描到的部分结果。
    pub async fn scan_local(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(DataError::invalid_path(format!(
                "source directory does not exist: {}",
                root.display()
            )));
        }

        info!("开始扫描本地目录: {}", root.display());

        let scanner = self.clone();
        let root = root.to_path_buf();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let (files, excluded) = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            let mut excluded = 0usize;

            for entry in WalkDir::new(&root).follow_links(false) {
                if scanner.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                    debug!("扫描已取消");
                    break;
                }

                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("跳过无法访问的条目: {}", e);
                        continue;
                    }
                };

                let is_file = if entry.path_is_symlink() {
                    std::fs::metadata(entry.path()).is_ok_and(|m| m.is_file())
                } else {
                    entry.file_type().is_file()
                };
                if !is_file {
                    continue;
                }

                if !scanner.config.exclude_patterns.is_empty() {
                    if let Ok(relative) = relative_key_for(&root, entry.path()) {
                        if scanner.should_exclude(&relative) {
                            debug!("排除文件: {}", relative);
                            excluded += 1;
                            continue;
                        }
                    }
                }

                files.push(entry.into_path());
            }

            (files, excluded)
        })
        .await
        .map_err(|e| DataError::Worker(e.to_string()))?;

        info!("扫描完成: {} 个文件, {} 个被排除", files.len(), excluded);

        Ok(files)
    }
}

/// 简单的 glob 模式匹配（忽略大小写）
///
/// - `dir/**` 匹配 dir 下的所有内容
/// - `*` 匹配任意字符
/// - 其他模式按完整路径或文件名精确匹配
pub fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = path.to_lowercase();
    let pattern = pattern.to_lowercase();

    // 处理 ** 通配符
    if let Some((prefix, suffix)) = pattern.split_once("**") {
        let prefix = prefix.trim_end_matches('/');
        let suffix = suffix.trim_start_matches('/');

        if !prefix.is_empty() && path != prefix && !path.starts_with(&format!("{}/", prefix)) {
            return false;
        }
        return suffix.is_empty() || matches_pattern(&path, suffix);
    }

    let name = path.rsplit('/').next().unwrap_or(path.as_str());

    // 处理 * 通配符
    if pattern.contains('*') {
        let regex_pattern = regex::escape(&pattern).replace(r"\*", ".*");
        if let Ok(re) = regex::Regex::new(&format!("^{}$", regex_pattern)) {
            return re.is_match(&path) || re.is_match(name);
        }
    }

    // 精确匹配
    path == pattern || name == pattern
}
