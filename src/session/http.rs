//! EPIC REST 会话服务客户端

use super::{ProfileDetails, SessionDetails, SessionProvider};
use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// 会话服务请求超时（秒）
const REQUEST_TIMEOUT_SECS: u64 = 30;

const SESSION_PATH: &str = "data/session/";
const PROFILE_PATH: &str = "profile/settings/";

#[derive(Debug, Deserialize)]
struct SessionTokenResponse {
    aws_key_id: String,
    aws_secret_key: String,
    aws_session_token: String,
    expiration: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct DataSessionResponse {
    session_token: SessionTokenResponse,
    aws_region: String,
    s3_obj_key: String,
    s3_location: String,
}

impl From<DataSessionResponse> for SessionDetails {
    fn from(resp: DataSessionResponse) -> Self {
        SessionDetails {
            access_key: resp.session_token.aws_key_id,
            secret_key: resp.session_token.aws_secret_key,
            session_token: resp.session_token.aws_session_token,
            expiry: resp.session_token.expiration,
            region: resp.aws_region,
            key_prefix: resp.s3_obj_key,
            bucket: resp.s3_location,
        }
        .normalized()
    }
}

/// 通过 API token 访问会话服务
pub struct HttpSessionProvider {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSessionProvider {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(DataError::credential)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!("请求会话服务: {}", url);

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(DataError::credential)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DataError::credential(format!(
                "{} returned {}: {}",
                url,
                status,
                body.trim()
            )));
        }

        resp.json::<T>().await.map_err(DataError::credential)
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    async fn fetch_session(&self) -> Result<SessionDetails> {
        let resp: DataSessionResponse = self.get_json(SESSION_PATH).await?;
        Ok(resp.into())
    }

    async fn fetch_profile(&self) -> Result<ProfileDetails> {
        self.get_json(PROFILE_PATH).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_response_maps_to_details() {
        let json = r#"{
            "session_token": {
                "aws_key_id": "ASIAXYZ",
                "aws_secret_key": "s3cr3t",
                "aws_session_token": "tok",
                "expiration": "2026-10-16T12:00:00Z"
            },
            "aws_region": "eu-west-2",
            "s3_obj_key": "1042",
            "s3_location": "epic-user-data"
        }"#;
        let resp: DataSessionResponse = serde_json::from_str(json).unwrap();
        let details = SessionDetails::from(resp);

        assert_eq!(details.access_key, "ASIAXYZ");
        assert_eq!(details.key_prefix, "1042/");
        assert_eq!(details.bucket, "epic-user-data");
        assert_eq!(details.expiry.to_rfc3339(), "2026-10-16T12:00:00+00:00");
    }

    #[test]
    fn test_profile_ignores_extra_fields() {
        let profile: ProfileDetails =
            serde_json::from_str(r#"{"id": 99, "display_name": "x"}"#).unwrap();
        assert_eq!(profile.id, 99);
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let provider = HttpSessionProvider::new("https://epic.zenotech.com/api/v2/", "t").unwrap();
        assert_eq!(
            provider.url(SESSION_PATH),
            "https://epic.zenotech.com/api/v2/data/session/"
        );
    }

    #[tokio::test]
    async fn test_unreachable_service_is_credential_error() {
        // 端口 9 (discard) 上没有服务
        let provider = HttpSessionProvider::new("http://127.0.0.1:9/api/v2", "t").unwrap();
        let err = provider.fetch_session().await.unwrap_err();
        assert!(matches!(err, DataError::Credential(_)));
    }
}
