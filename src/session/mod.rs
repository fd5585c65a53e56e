//! 对象存储会话
//!
//! 会话服务签发有过期时间的临时凭证。[`CredentialSession`] 在第一次远程操作时
//! 建立连接，凭证临近过期时透明地重新获取并重建存储客户端。所有 worker 共享同一个
//! 会话，刷新只在这里发生。

pub mod http;

use crate::error::Result;
use crate::store::{ObjectStore, S3Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use http::HttpSessionProvider;

/// 上传对象时附加的来源标签
pub const META_SOURCE: &str = "SDK";
/// 默认提前刷新时间（秒）
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;

/// 会话服务返回的临时凭证及存储位置
#[derive(Clone)]
pub struct SessionDetails {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub expiry: DateTime<Utc>,
    pub region: String,
    /// 当前账户所有对象的 key 前缀，总是以 `/` 结尾（空前缀除外）
    pub key_prefix: String,
    pub bucket: String,
}

impl SessionDetails {
    /// 规范化 key 前缀
    pub fn normalized(mut self) -> Self {
        if !self.key_prefix.is_empty() && !self.key_prefix.ends_with('/') {
            self.key_prefix.push('/');
        }
        self
    }
}

impl fmt::Debug for SessionDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDetails")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiry", &self.expiry)
            .field("region", &self.region)
            .field("key_prefix", &self.key_prefix)
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// 调用者的账户信息
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProfileDetails {
    pub id: i64,
}

/// 会话服务接口
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// 获取一组新的临时凭证
    async fn fetch_session(&self) -> Result<SessionDetails>;

    /// 获取调用者的账户信息
    async fn fetch_profile(&self) -> Result<ProfileDetails>;
}

/// 根据凭证构造存储客户端
pub type StoreBuilder =
    Arc<dyn Fn(&SessionDetails) -> Result<Arc<dyn ObjectStore>> + Send + Sync>;

/// 默认的 S3 存储构造器
pub fn s3_store_builder(endpoint: Option<String>) -> StoreBuilder {
    Arc::new(move |details: &SessionDetails| {
        let store = S3Store::new(details, endpoint.as_deref())?;
        Ok(Arc::new(store) as Arc<dyn ObjectStore>)
    })
}

/// 一代凭证对应的存储连接，建立后只读
pub struct Connection {
    pub store: Arc<dyn ObjectStore>,
    pub key_prefix: String,
    pub bucket: String,
    pub expiry: DateTime<Utc>,
    /// 上传时附加的元数据 `{Source, User-Profile}`
    pub upload_metadata: HashMap<String, String>,
}

impl Connection {
    /// 凭证是否已过期或将在 margin 内过期
    pub fn is_stale(&self, margin: chrono::Duration) -> bool {
        Utc::now() + margin >= self.expiry
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("store", &self.store.name())
            .field("key_prefix", &self.key_prefix)
            .field("bucket", &self.bucket)
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[derive(Default)]
struct SessionState {
    connection: Option<Arc<Connection>>,
    upload_metadata: Option<HashMap<String, String>>,
}

/// 自动刷新的凭证会话
pub struct CredentialSession {
    provider: Arc<dyn SessionProvider>,
    build_store: StoreBuilder,
    refresh_margin: chrono::Duration,
    state: Mutex<SessionState>,
    generations: AtomicU64,
}

impl CredentialSession {
    pub fn new(provider: Arc<dyn SessionProvider>, build_store: StoreBuilder) -> Self {
        Self {
            provider,
            build_store,
            refresh_margin: chrono::Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS as i64),
            state: Mutex::new(SessionState::default()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn with_refresh_margin(mut self, seconds: u64) -> Self {
        self.refresh_margin = chrono::Duration::seconds(seconds as i64);
        self
    }

    /// 获取当前连接，必要时建立或刷新
    ///
    /// 整个检查-构造过程持有锁，并发调用只会构造一个存储客户端。
    pub async fn connect(&self) -> Result<Arc<Connection>> {
        let mut state = self.state.lock().await;

        if let Some(conn) = &state.connection {
            if !conn.is_stale(self.refresh_margin) {
                return Ok(conn.clone());
            }
            debug!("会话凭证将于 {} 过期，重新获取", conn.expiry);
        }

        let details = self.provider.fetch_session().await?.normalized();

        let upload_metadata = match &state.upload_metadata {
            Some(meta) => meta.clone(),
            None => {
                let profile = self.provider.fetch_profile().await?;
                let meta = upload_metadata_for(&profile);
                state.upload_metadata = Some(meta.clone());
                meta
            }
        };

        let store = (self.build_store)(&details)?;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "已连接存储 {} (第 {} 代凭证, 过期时间 {})",
            store.name(),
            generation,
            details.expiry
        );

        let conn = Arc::new(Connection {
            store,
            key_prefix: details.key_prefix,
            bucket: details.bucket,
            expiry: details.expiry,
            upload_metadata,
        });
        state.connection = Some(conn.clone());
        Ok(conn)
    }

    /// 已构造的存储客户端数量
    pub fn generations(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }
}

fn upload_metadata_for(profile: &ProfileDetails) -> HashMap<String, String> {
    HashMap::from([
        ("Source".to_string(), META_SOURCE.to_string()),
        ("User-Profile".to_string(), profile.id.to_string()),
    ])
}

/// 返回固定凭证的会话服务
///
/// 适用于已持有凭证的作业脚本以及测试。
pub struct StaticSessionProvider {
    details: SessionDetails,
    profile_id: i64,
    fetches: AtomicU64,
}

impl StaticSessionProvider {
    pub fn new(details: SessionDetails, profile_id: i64) -> Self {
        Self {
            details,
            profile_id,
            fetches: AtomicU64::new(0),
        }
    }

    /// fetch_session 被调用的次数
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn fetch_session(&self) -> Result<SessionDetails> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.details.clone())
    }

    async fn fetch_profile(&self) -> Result<ProfileDetails> {
        Ok(ProfileDetails {
            id: self.profile_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataError;
    use crate::store::MemoryStore;

    fn details(expiry: DateTime<Utc>) -> SessionDetails {
        SessionDetails {
            access_key: "AKIA".into(),
            secret_key: "secret".into(),
            session_token: "token".into(),
            expiry,
            region: "eu-west-2".into(),
            key_prefix: "1042".into(),
            bucket: "epic-data".into(),
        }
    }

    fn memory_builder() -> StoreBuilder {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new("session"));
        Arc::new(move |_: &SessionDetails| Ok(store.clone()))
    }

    #[tokio::test]
    async fn test_connect_is_lazy_and_cached() {
        let provider = Arc::new(StaticSessionProvider::new(
            details(Utc::now() + chrono::Duration::hours(1)),
            7,
        ));
        let session = CredentialSession::new(provider.clone(), memory_builder());
        assert_eq!(provider.fetch_count(), 0);

        let first = session.connect().await.unwrap();
        let second = session.connect().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.fetch_count(), 1);
        assert_eq!(first.key_prefix, "1042/");
        assert_eq!(first.upload_metadata["Source"], "SDK");
        assert_eq!(first.upload_metadata["User-Profile"], "7");
    }

    #[tokio::test]
    async fn test_concurrent_connect_builds_one_store() {
        let provider = Arc::new(StaticSessionProvider::new(
            details(Utc::now() + chrono::Duration::hours(1)),
            7,
        ));
        let session = Arc::new(CredentialSession::new(provider.clone(), memory_builder()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.connect().await.map(|_| ()) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(session.generations(), 1);
        assert_eq!(provider.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_credentials_are_refreshed() {
        let provider = Arc::new(StaticSessionProvider::new(
            details(Utc::now() + chrono::Duration::seconds(60)),
            7,
        ));
        let session = CredentialSession::new(provider.clone(), memory_builder());

        // 60 秒后过期，落在默认 300 秒的刷新窗口内
        session.connect().await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(provider.fetch_count(), 2);
        assert_eq!(session.generations(), 2);
    }

    struct FailingProvider;

    #[async_trait]
    impl SessionProvider for FailingProvider {
        async fn fetch_session(&self) -> Result<SessionDetails> {
            Err(DataError::credential("session service unavailable"))
        }

        async fn fetch_profile(&self) -> Result<ProfileDetails> {
            Ok(ProfileDetails { id: 1 })
        }
    }

    #[tokio::test]
    async fn test_provider_failure_is_credential_error() {
        let session = CredentialSession::new(Arc::new(FailingProvider), memory_builder());
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, DataError::Credential(_)));
        assert_eq!(session.generations(), 0);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let text = format!("{:?}", details(Utc::now()));
        assert!(!text.contains("secret\""));
        assert!(text.contains("<redacted>"));
    }
}
