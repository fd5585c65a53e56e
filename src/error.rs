//! 错误类型

use thiserror::Error;

/// 数据客户端错误
#[derive(Debug, Error)]
pub enum DataError {
    /// 逻辑路径格式错误、scheme 不匹配，或派生出的本地路径不安全
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// 远程前缀下没有任何对象
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// 无法获取或刷新对象存储凭证
    #[error("unable to obtain storage credentials: {0}")]
    Credential(String),

    /// sync 的源和目标必须恰好有一个是远程路径
    #[error("exactly one of source and target must be an epic:// path (source={source_path}, target={target_path})")]
    AmbiguousPath {
        source_path: String,
        target_path: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] opendal::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// 传输 worker 异常退出（panic 或被中止）
    #[error("transfer worker failed: {0}")]
    Worker(String),
}

impl DataError {
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        DataError::InvalidPath(msg.into())
    }

    pub fn credential(msg: impl std::fmt::Display) -> Self {
        DataError::Credential(msg.to_string())
    }

    /// 对象不存在（用于 head 等返回 None 的判定）
    pub fn is_not_found(&self) -> bool {
        match self {
            DataError::PathNotFound(_) => true,
            DataError::Storage(e) => e.kind() == opendal::ErrorKind::NotFound,
            DataError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
