//! 单元测试共用的会话/存储构造

use crate::session::{CredentialSession, SessionDetails, StaticSessionProvider, StoreBuilder};
use crate::store::{MemoryStore, ObjectStore};
use chrono::Utc;
use std::sync::Arc;

pub const PREFIX: &str = "1042/";

pub fn details() -> SessionDetails {
    SessionDetails {
        access_key: "AKIA".into(),
        secret_key: "secret".into(),
        session_token: "token".into(),
        expiry: Utc::now() + chrono::Duration::hours(1),
        region: "eu-west-2".into(),
        key_prefix: PREFIX.into(),
        bucket: "epic-data".into(),
    }
}

pub fn memory_session(store: Arc<MemoryStore>) -> Arc<CredentialSession> {
    let builder: StoreBuilder = Arc::new(move |_: &SessionDetails| {
        Ok(store.clone() as Arc<dyn ObjectStore>)
    });
    let provider = Arc::new(StaticSessionProvider::new(details(), 7));
    Arc::new(CredentialSession::new(provider, builder))
}
