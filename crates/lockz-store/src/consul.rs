//! Consul HTTP driver
//!
//! Talks to a Consul agent over `/v1/kv` and `/v1/session`. Blocking reads use
//! `?index=&wait=` and the `X-Consul-Index` response header.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::model::{KvPair, QueryMeta, QueryOptions, SessionEntry, format_duration};
use crate::store::Store;

pub const DEFAULT_CONSUL_ADDRESS: &str = "127.0.0.1:8500";

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Configuration for the Consul driver
#[derive(Clone, Debug)]
pub struct ConsulConfig {
    /// Agent address, `host:port` or a full URL
    pub address: String,
    /// URL scheme used when `address` has none
    pub scheme: String,
    /// ACL token sent with every request
    pub token: Option<String>,
    /// Datacenter to query
    pub datacenter: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds; must exceed `wait_time`
    pub read_timeout_ms: u64,
    /// Default wait for blocking reads
    pub wait_time: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_CONSUL_ADDRESS.to_string(),
            scheme: "http".to_string(),
            token: None,
            datacenter: None,
            connect_timeout_ms: 5000,
            read_timeout_ms: 600_000,
            wait_time: Duration::from_secs(300),
        }
    }
}

impl ConsulConfig {
    /// Create a new config for a single agent address
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    /// Set the ACL token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Set the datacenter
    pub fn with_datacenter(mut self, dc: &str) -> Self {
        self.datacenter = Some(dc.to_string());
        self
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    /// Set the default blocking-read wait
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Base URL of the agent
    pub fn base_url(&self) -> String {
        if self.address.contains("://") {
            self.address.trim_end_matches('/').to_string()
        } else {
            format!("{}://{}", self.scheme, self.address)
        }
    }
}

// ============================================================================
// Wire Models
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireKvPair {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "CreateIndex", default)]
    create_index: u64,
    #[serde(rename = "ModifyIndex", default)]
    modify_index: u64,
    #[serde(rename = "LockIndex", default)]
    lock_index: u64,
    #[serde(rename = "Flags", default)]
    flags: u64,
    /// Base64 encoded
    #[serde(rename = "Value", default)]
    value: Option<String>,
    #[serde(rename = "Session", default)]
    session: Option<String>,
}

impl TryFrom<WireKvPair> for KvPair {
    type Error = StoreError;

    fn try_from(wire: WireKvPair) -> Result<Self> {
        let value = match wire.value {
            Some(encoded) => BASE64
                .decode(encoded)
                .map_err(|e| StoreError::Decode(format!("key '{}': {}", wire.key, e)))?,
            None => Vec::new(),
        };
        Ok(KvPair {
            key: wire.key,
            value,
            session: wire.session.filter(|s| !s.is_empty()),
            flags: wire.flags,
            create_index: wire.create_index,
            modify_index: wire.modify_index,
            lock_index: wire.lock_index,
        })
    }
}

#[derive(Debug, Serialize)]
struct SessionCreateRequest<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Behavior")]
    behavior: &'a str,
    #[serde(rename = "TTL")]
    ttl: &'a str,
    #[serde(rename = "LockDelay")]
    lock_delay: String,
}

#[derive(Debug, Deserialize)]
struct SessionCreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

// ============================================================================
// Driver
// ============================================================================

/// HTTP store driver for a Consul agent
pub struct ConsulStore {
    client: Client,
    config: ConsulConfig,
    base_url: String,
}

impl std::fmt::Debug for ConsulStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulStore")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ConsulStore {
    /// Create a new driver. No connection is made until the first request.
    pub fn new(config: ConsulConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()?;

        Ok(Self {
            base_url: config.base_url(),
            client,
            config,
        })
    }

    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    fn kv_path(key: &str) -> String {
        format!("/v1/kv/{}", key.trim_start_matches('/'))
    }

    /// Build a request with token header and datacenter applied
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, &url);
        if let Some(token) = &self.config.token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        if let Some(dc) = &self.config.datacenter {
            builder = builder.query(&[("dc", dc)]);
        }
        builder
    }

    /// Fail on non-success status, keeping the body for diagnostics
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("Consul request failed with status {}: {}", status, body);
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn last_index(response: &Response) -> u64 {
        response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            .max(1)
    }
}

#[async_trait]
impl Store for ConsulStore {
    async fn kv_get(
        &self,
        key: &str,
        opts: Option<&QueryOptions>,
    ) -> Result<(Option<KvPair>, QueryMeta)> {
        let mut builder = self.request(Method::GET, &Self::kv_path(key));
        if let Some(query) = opts
            && query.wait_index > 0
        {
            let wait = query.wait_time.unwrap_or(self.config.wait_time);
            builder = builder.query(&[
                ("index", query.wait_index.to_string()),
                ("wait", format_duration(wait)),
            ]);
        }

        let response = builder.send().await?;
        let meta = QueryMeta {
            last_index: Self::last_index(&response),
        };

        if response.status() == StatusCode::NOT_FOUND {
            debug!(key, last_index = meta.last_index, "key not found");
            return Ok((None, meta));
        }

        let pairs: Vec<WireKvPair> = Self::json(response).await?;
        let pair = pairs.into_iter().next().map(KvPair::try_from).transpose()?;
        Ok((pair, meta))
    }

    async fn kv_put(&self, pair: &KvPair) -> Result<bool> {
        let mut builder = self
            .request(Method::PUT, &Self::kv_path(&pair.key))
            .body(pair.value.clone());
        if pair.flags != 0 {
            builder = builder.query(&[("flags", pair.flags)]);
        }
        Self::json(builder.send().await?).await
    }

    async fn kv_acquire(&self, pair: &KvPair) -> Result<bool> {
        let session = pair.session.as_deref().unwrap_or_default();
        let mut builder = self
            .request(Method::PUT, &Self::kv_path(&pair.key))
            .query(&[("acquire", session)])
            .body(pair.value.clone());
        if pair.flags != 0 {
            builder = builder.query(&[("flags", pair.flags)]);
        }
        let acquired: bool = Self::json(builder.send().await?).await?;
        debug!(key = %pair.key, session, acquired, "acquire");
        Ok(acquired)
    }

    async fn kv_delete(&self, key: &str) -> Result<bool> {
        let response = self
            .request(Method::DELETE, &Self::kv_path(key))
            .send()
            .await?;
        Self::json(response).await
    }

    async fn kv_delete_cas(&self, key: &str, modify_index: u64) -> Result<bool> {
        let response = self
            .request(Method::DELETE, &Self::kv_path(key))
            .query(&[("cas", modify_index)])
            .send()
            .await?;
        Self::json(response).await
    }

    async fn session_create(&self, entry: &SessionEntry) -> Result<String> {
        let body = SessionCreateRequest {
            name: &entry.name,
            behavior: entry.behavior.as_str(),
            ttl: &entry.ttl,
            lock_delay: format_duration(entry.lock_delay),
        };
        let response = self
            .request(Method::PUT, "/v1/session/create")
            .json(&body)
            .send()
            .await?;
        let created: SessionCreateResponse = Self::json(response).await?;
        Ok(created.id)
    }

    async fn session_renew(&self, session_id: &str) -> Result<()> {
        let response = self
            .request(Method::PUT, &format!("/v1/session/renew/{}", session_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn session_destroy(&self, session_id: &str) -> Result<()> {
        let response = self
            .request(Method::PUT, &format!("/v1/session/destroy/{}", session_id))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ConsulConfig::default();
        assert_eq!(config.address, "127.0.0.1:8500");
        assert_eq!(config.scheme, "http");
        assert!(config.token.is_none());
        assert_eq!(config.wait_time, Duration::from_secs(300));
        assert!(config.read_timeout_ms > config.wait_time.as_millis() as u64);
    }

    #[test]
    fn test_config_builder() {
        let config = ConsulConfig::new("10.0.0.1:8500")
            .with_token("secret")
            .with_datacenter("dc2")
            .with_timeouts(1000, 20000)
            .with_wait_time(Duration::from_secs(10));

        assert_eq!(config.address, "10.0.0.1:8500");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.datacenter.as_deref(), Some("dc2"));
        assert_eq!(config.connect_timeout_ms, 1000);
        assert_eq!(config.read_timeout_ms, 20000);
        assert_eq!(config.wait_time, Duration::from_secs(10));
    }

    #[test]
    fn test_base_url() {
        assert_eq!(
            ConsulConfig::new("127.0.0.1:8500").base_url(),
            "http://127.0.0.1:8500"
        );
        assert_eq!(
            ConsulConfig::new("https://consul.local:8501/").base_url(),
            "https://consul.local:8501"
        );
    }

    #[test]
    fn test_kv_path() {
        assert_eq!(ConsulStore::kv_path("locks/a"), "/v1/kv/locks/a");
        assert_eq!(ConsulStore::kv_path("/locks/a"), "/v1/kv/locks/a");
    }

    #[test]
    fn test_wire_pair_decodes_base64() {
        let wire: WireKvPair = serde_json::from_str(
            r#"{"Key":"k","CreateIndex":3,"ModifyIndex":7,"LockIndex":1,"Flags":0,"Value":"aGVsbG8=","Session":"s1"}"#,
        )
        .unwrap();
        let pair = KvPair::try_from(wire).unwrap();
        assert_eq!(pair.value, b"hello");
        assert_eq!(pair.modify_index, 7);
        assert_eq!(pair.session.as_deref(), Some("s1"));
    }

    #[test]
    fn test_wire_pair_rejects_bad_base64() {
        let wire: WireKvPair =
            serde_json::from_str(r#"{"Key":"k","Value":"***"}"#).unwrap();
        let err = KvPair::try_from(wire).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }
}
