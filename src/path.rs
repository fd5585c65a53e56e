//! 逻辑路径 (`epic://folder/file`) 与对象存储 key 之间的转换
//!
//! 逻辑路径以 `/` 结尾表示文件夹（即 key 前缀），否则表示单个对象。
//! 存储 key = 会话前缀 + 去掉 scheme 后的相对路径。

use crate::error::{DataError, Result};
use std::path::{Path, PathBuf};

/// 远程路径 scheme
pub const SCHEME: &str = "epic://";

/// 单个路径段的最大字节数（常见文件系统的 NAME_MAX）
const MAX_SEGMENT_BYTES: usize = 255;

/// 是否为远程逻辑路径
pub fn is_remote(path: &str) -> bool {
    path.starts_with(SCHEME)
}

/// 是否表示文件夹
pub fn is_folder(path: &str) -> bool {
    path.ends_with('/')
}

/// 确保路径以 `/` 结尾
pub fn ensure_folder(path: &str) -> String {
    if is_folder(path) {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// 逻辑路径 -> 存储 key
pub fn to_store_key(logical: &str, key_prefix: &str) -> Result<String> {
    let raw = logical.strip_prefix(SCHEME).ok_or_else(|| {
        DataError::invalid_path(format!("path must start with {}: {}", SCHEME, logical))
    })?;
    Ok(format!("{}{}", key_prefix, raw))
}

/// 存储 key -> 逻辑路径
///
/// 优先精确剥离当前会话前缀；key 不在该前缀下时退化为去掉第一个路径段。
pub fn to_logical_path(key: &str, key_prefix: &str) -> String {
    if !key_prefix.is_empty() {
        if let Some(rest) = key.strip_prefix(key_prefix) {
            return format!("{}{}", SCHEME, rest);
        }
    }
    let rest = key.split_once('/').map_or(key, |(_, rest)| rest);
    format!("{}{}", SCHEME, rest)
}

/// 逻辑路径或 key 的最后一段名称（文件夹取倒数第二段）
pub fn entry_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// 检查相对 key 能否安全地映射为本地路径
pub fn validate_relative_key(relative: &str) -> Result<()> {
    if relative.contains('\0') {
        return Err(DataError::invalid_path(format!(
            "key contains NUL byte: {:?}",
            relative
        )));
    }

    let body = relative.strip_suffix('/').unwrap_or(relative);
    if body.is_empty() {
        return Ok(());
    }

    for segment in body.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(DataError::invalid_path(format!(
                "key is not a safe local path: {}",
                relative
            )));
        }
        if segment.len() > MAX_SEGMENT_BYTES {
            return Err(DataError::invalid_path(format!(
                "key segment too long ({} bytes): {}",
                segment.len(),
                relative
            )));
        }
    }
    Ok(())
}

/// 相对 key -> 本地路径（校验通过后按 `/` 拆分拼接到 root 下）
pub fn local_path_for(root: &Path, relative: &str) -> Result<PathBuf> {
    validate_relative_key(relative)?;
    let mut path = root.to_path_buf();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    Ok(path)
}

/// 本地文件相对同步根目录的 key 片段（统一使用 `/`，去掉开头分隔符）
pub fn relative_key_for(root: &Path, file: &Path) -> Result<String> {
    let relative = file.strip_prefix(root).map_err(|_| {
        DataError::invalid_path(format!(
            "{} is not under {}",
            file.display(),
            root.display()
        ))
    })?;

    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let key = parts.join("/");
    Ok(key.trim_start_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const PREFIX: &str = "1042/";

    #[rstest]
    #[case("epic://a.txt")]
    #[case("epic://proj/")]
    #[case("epic://proj/sub/deep/b.txt")]
    #[case("epic://")]
    fn test_round_trip_under_session_prefix(#[case] logical: &str) {
        let key = to_store_key(logical, PREFIX).unwrap();
        assert!(key.starts_with(PREFIX));
        assert_eq!(to_logical_path(&key, PREFIX), logical);
    }

    #[test]
    fn test_multi_segment_prefix_round_trip() {
        let prefix = "team/7/user/";
        let key = to_store_key("epic://proj/a.txt", prefix).unwrap();
        assert_eq!(key, "team/7/user/proj/a.txt");
        assert_eq!(to_logical_path(&key, prefix), "epic://proj/a.txt");
    }

    #[test]
    fn test_foreign_key_falls_back_to_first_segment() {
        assert_eq!(to_logical_path("9999/x/y.txt", PREFIX), "epic://x/y.txt");
    }

    #[rstest]
    #[case("/home/me/data")]
    #[case("s3://bucket/key")]
    #[case("epic:/missing-slash")]
    fn test_rejects_non_epic_paths(#[case] path: &str) {
        assert!(matches!(
            to_store_key(path, PREFIX),
            Err(DataError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_entry_name() {
        assert_eq!(entry_name("1042/proj/sub/"), "sub");
        assert_eq!(entry_name("1042/proj/a.txt"), "a.txt");
    }

    #[rstest]
    #[case("a.txt", true)]
    #[case("sub/b.txt", true)]
    #[case("sub/", true)]
    #[case("", true)]
    #[case("../etc/passwd", false)]
    #[case("a/./b", false)]
    #[case("a//b", false)]
    #[case("bad\0name", false)]
    fn test_validate_relative_key(#[case] key: &str, #[case] ok: bool) {
        assert_eq!(validate_relative_key(key).is_ok(), ok);
    }

    #[test]
    fn test_overlong_segment_rejected() {
        let key = format!("dir/{}", "x".repeat(300));
        assert!(validate_relative_key(&key).is_err());
    }

    #[test]
    fn test_local_and_relative_key_are_inverse() {
        let root = Path::new("/tmp/sync-root");
        let local = local_path_for(root, "sub/b.txt").unwrap();
        assert_eq!(local, root.join("sub").join("b.txt"));
        assert_eq!(relative_key_for(root, &local).unwrap(), "sub/b.txt");
    }

    #[test]
    fn test_relative_key_outside_root() {
        let err = relative_key_for(Path::new("/a"), Path::new("/b/c")).unwrap_err();
        assert!(matches!(err, DataError::InvalidPath(_)));
    }
}
