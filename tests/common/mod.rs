#![allow(dead_code)]

use chrono::Utc;
use epic_sync::session::StoreBuilder;
use epic_sync::{
    CredentialSession, DataClient, MemoryStore, ObjectStore, SessionDetails,
    StaticSessionProvider, TransferCallback, TransferResult,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const PREFIX: &str = "1042/";
pub const PROFILE_ID: i64 = 7;

pub fn session_details() -> SessionDetails {
    SessionDetails {
        access_key: "AKIATEST".into(),
        secret_key: "secret".into(),
        session_token: "token".into(),
        expiry: Utc::now() + chrono::Duration::hours(1),
        region: "eu-west-2".into(),
        key_prefix: PREFIX.into(),
        bucket: "epic-data".into(),
    }
}

/// 基于内存存储的客户端
pub fn memory_client(store: &Arc<MemoryStore>) -> DataClient {
    let store = store.clone();
    let builder: StoreBuilder =
        Arc::new(move |_: &SessionDetails| Ok(store.clone() as Arc<dyn ObjectStore>));
    let provider = Arc::new(StaticSessionProvider::new(session_details(), PROFILE_ID));
    DataClient::new(Arc::new(CredentialSession::new(provider, builder)))
}

/// 记录所有回调
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<TransferResult>>>,
}

impl Recorder {
    pub fn callback(&self) -> TransferCallback {
        let seen = self.seen.clone();
        Arc::new(move |r: &TransferResult| seen.lock().unwrap().push(r.clone()))
    }

    pub fn results(&self) -> Vec<TransferResult> {
        self.seen.lock().unwrap().clone()
    }

    /// 按 (source, destination) 排序后的路径对
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .results()
            .into_iter()
            .map(|r| (r.source, r.destination))
            .collect();
        pairs.sort();
        pairs
    }
}

pub fn write_file(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}
