//! 客户端配置
//!
//! 所有设置保存在配置目录下的 `config.json` 中。读取宽松：文件缺失或损坏时使用默认值；
//! 保存时合并到已有文件，不覆盖其他键。

use crate::logging::LogConfig;
use crate::session::DEFAULT_REFRESH_MARGIN_SECS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";
pub const APP_DIR: &str = "epic-sync";

pub const DEFAULT_API_URL: &str = "https://epic.zenotech.com/api/v2";
pub const ENV_TOKEN: &str = "EPIC_TOKEN";
pub const ENV_API_URL: &str = "EPIC_API_URL";

/// 客户端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// REST API 根地址
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// 下载默认并发数
    #[serde(default = "default_download_threads")]
    pub download_threads: usize,
    /// 上传默认并发数
    #[serde(default = "default_upload_threads")]
    pub upload_threads: usize,
    /// 凭证过期前多少秒刷新
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
    /// 同步时排除的文件
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_download_threads() -> usize {
    3
}

fn default_upload_threads() -> usize {
    1
}

fn default_refresh_margin() -> u64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            download_threads: default_download_threads(),
            upload_threads: default_upload_threads(),
            refresh_margin_secs: default_refresh_margin(),
            exclude_patterns: Vec::new(),
            log: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    /// 从配置目录加载
    pub fn load(config_dir: &Path) -> Self {
        fs::read_to_string(config_dir.join(CONFIG_FILE))
            .ok()
            .and_then(|content| serde_json::from_str::<ClientConfig>(&content).ok())
            .unwrap_or_default()
    }

    /// 用环境变量覆盖 token 和 API 地址
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = lookup(ENV_TOKEN).filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.is_empty()) {
            self.api_url = url;
        }
        self
    }

    /// 保存到配置目录，保留文件中的其他键
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        fs::create_dir_all(config_dir)?;
        let config_file = config_dir.join(CONFIG_FILE);

        // 读取现有配置
        let mut config: serde_json::Value = fs::read_to_string(&config_file)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .filter(serde_json::Value::is_object)
            .unwrap_or_else(|| serde_json::json!({}));

        let ours = serde_json::to_value(self).map_err(io::Error::other)?;
        if let (Some(target), serde_json::Value::Object(fields)) = (config.as_object_mut(), ours) {
            for (key, value) in fields {
                target.insert(key, value);
            }
            if self.token.is_none() {
                target.remove("token");
            }
        }

        let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
        fs::write(&config_file, content)
    }
}

/// 每个用户的配置目录
///
/// Linux 使用 `$XDG_CONFIG_HOME` 或 `~/.config`，Windows 使用 `%APPDATA%`，
/// macOS 使用 `~/Library/Application Support`。
pub fn config_dir() -> PathBuf {
    base_config_dir()
        .map(|p| p.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_DIR)))
}

fn base_config_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        home_dir().map(|h| h.join("Library").join("Application Support"))
    } else {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| home_dir().map(|h| h.join(".config")))
    }
}

pub fn home_dir() -> Option<PathBuf> {
    let var = if cfg!(target_os = "windows") {
        "USERPROFILE"
    } else {
        "HOME"
    };
    std::env::var(var).ok().filter(|h| !h.is_empty()).map(PathBuf::from)
}

/// 展开开头的 `~`
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_or_corrupt_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(ClientConfig::load(dir.path()), ClientConfig::default());

        fs::write(dir.path().join(CONFIG_FILE), "{not json").unwrap();
        let config = ClientConfig::load(dir.path());
        assert_eq!(config.download_threads, 3);
        assert_eq!(config.upload_threads, 1);
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"token": "abc", "downloadThreads": 8, "log": {"level": "debug"}}"#,
        )
        .unwrap();

        let config = ClientConfig::load(dir.path());
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.download_threads, 8);
        assert_eq!(config.refresh_margin_secs, 300);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.max_size_mb, 5);
    }

    #[test]
    fn test_save_keeps_unknown_keys() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"custom": 42}"#).unwrap();

        let config = ClientConfig {
            token: Some("t".into()),
            ..Default::default()
        };
        config.save(dir.path()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap())
                .unwrap();
        assert_eq!(raw["custom"], 42);
        assert_eq!(raw["token"], "t");
        assert_eq!(raw["uploadThreads"], 1);
        assert_eq!(ClientConfig::load(dir.path()), config);
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::default().with_overrides(|key| match key {
            ENV_TOKEN => Some("from-env".into()),
            ENV_API_URL => Some("http://localhost:8000/api/v2".into()),
            _ => None,
        });
        assert_eq!(config.token.as_deref(), Some("from-env"));
        assert_eq!(config.api_url, "http://localhost:8000/api/v2");

        let untouched = ClientConfig::default().with_overrides(|_| Some(String::new()));
        assert_eq!(untouched, ClientConfig::default());
    }

    #[test]
    fn test_expand_home_leaves_other_paths() {
        assert_eq!(expand_home("/data/run"), PathBuf::from("/data/run"));
        assert_eq!(expand_home("rel/dir"), PathBuf::from("rel/dir"));
    }
}
