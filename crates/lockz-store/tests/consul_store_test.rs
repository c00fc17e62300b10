//! ConsulStore HTTP tests
//!
//! Request shapes and response handling are checked against a wiremock server.
//! The live-agent test at the bottom is ignored by default.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use lockz_store::{
    ConsulConfig, ConsulStore, KvPair, QueryOptions, SessionBehavior, SessionEntry, Store,
    StoreError,
};
use serde_json::json;
use wiremock::matchers::{body_bytes, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(server: &MockServer) -> ConsulStore {
    ConsulStore::new(ConsulConfig::new(&server.uri())).unwrap()
}

// ============== KV Tests ==============

#[tokio::test]
async fn test_kv_get_decodes_value_and_index() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/locks/a"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Consul-Index", "42")
                .set_body_json(json!([{
                    "Key": "locks/a",
                    "CreateIndex": 40,
                    "ModifyIndex": 42,
                    "LockIndex": 1,
                    "Flags": 0,
                    "Value": BASE64.encode(br#"{"session_id":"s1"}"#),
                    "Session": "s1"
                }])),
        )
        .mount(&server)
        .await;

    let store = store_for(&server);
    let (pair, meta) = store.kv_get("locks/a", None).await.unwrap();
    let pair = pair.unwrap();

    assert_eq!(meta.last_index, 42);
    assert_eq!(pair.value, br#"{"session_id":"s1"}"#);
    assert_eq!(pair.session.as_deref(), Some("s1"));
    assert_eq!(pair.lock_index, 1);
}

#[tokio::test]
async fn test_kv_get_missing_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/locks/missing"))
        .respond_with(ResponseTemplate::new(404).insert_header("X-Consul-Index", "9"))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let (pair, meta) = store.kv_get("locks/missing", None).await.unwrap();
    assert!(pair.is_none());
    assert_eq!(meta.last_index, 9);
}

#[tokio::test]
async fn test_kv_get_blocking_query_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/k"))
        .and(query_param("index", "17"))
        .and(query_param("wait", "2s"))
        .respond_with(ResponseTemplate::new(404).insert_header("X-Consul-Index", "18"))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let query = QueryOptions {
        wait_index: 17,
        wait_time: Some(Duration::from_secs(2)),
    };
    let (_, meta) = store.kv_get("k", Some(&query)).await.unwrap();
    assert_eq!(meta.last_index, 18);
}

#[tokio::test]
async fn test_kv_get_index_never_zero() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/k"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let (_, meta) = store.kv_get("k", None).await.unwrap();
    assert_eq!(meta.last_index, 1);
}

#[tokio::test]
async fn test_kv_acquire_sends_session_and_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/k"))
        .and(query_param("acquire", "sess-1"))
        .and(body_bytes(b"payload".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let pair = KvPair::new("k", b"payload".to_vec()).with_session("sess-1");
    assert!(store.kv_acquire(&pair).await.unwrap());
}

#[tokio::test]
async fn test_kv_acquire_contended() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/k"))
        .respond_with(ResponseTemplate::new(200).set_body_string("false"))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let pair = KvPair::new("k", b"payload".to_vec()).with_session("sess-2");
    assert!(!store.kv_acquire(&pair).await.unwrap());
}

#[tokio::test]
async fn test_kv_delete() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/kv/k"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert!(store.kv_delete("k").await.unwrap());
}

#[tokio::test]
async fn test_kv_delete_cas_sends_index() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/kv/k"))
        .and(query_param("cas", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_string("false"))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert!(!store.kv_delete_cas("k", 42).await.unwrap());
}

#[tokio::test]
async fn test_server_error_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/k"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Invalid session"))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let pair = KvPair::new("k", b"v".to_vec()).with_session("gone");
    let err = store.kv_acquire(&pair).await.unwrap_err();
    match err {
        StoreError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "Invalid session");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============== Session Tests ==============

#[tokio::test]
async fn test_session_create_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/create"))
        .and(body_json(json!({
            "Name": "consensusLockz",
            "Behavior": "delete",
            "TTL": "10s",
            "LockDelay": "0s"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ID": "adf4238a" })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let entry = SessionEntry {
        name: "consensusLockz".to_string(),
        behavior: SessionBehavior::Delete,
        ttl: "10s".to_string(),
        lock_delay: Duration::ZERO,
    };
    assert_eq!(store.session_create(&entry).await.unwrap(), "adf4238a");
}

#[tokio::test]
async fn test_session_create_sub_millisecond_lock_delay() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/create"))
        .and(body_json(json!({
            "Name": "consensusLockz",
            "Behavior": "delete",
            "TTL": "10s",
            "LockDelay": "500us"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ID": "b1" })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let entry = SessionEntry {
        name: "consensusLockz".to_string(),
        behavior: SessionBehavior::Delete,
        ttl: "10s".to_string(),
        lock_delay: Duration::from_micros(500),
    };
    assert_eq!(store.session_create(&entry).await.unwrap(), "b1");
}

#[tokio::test]
async fn test_session_renew_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/renew/expired"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Session id 'expired' not found"))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store.session_renew("expired").await.unwrap_err();
    assert!(matches!(err, StoreError::SessionNotFound(id) if id == "expired"));
}

#[tokio::test]
async fn test_session_destroy_with_token() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/destroy/s1"))
        .and(header("X-Consul-Token", "acl-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(1)
        .mount(&server)
        .await;

    let store =
        ConsulStore::new(ConsulConfig::new(&server.uri()).with_token("acl-token")).unwrap();
    store.session_destroy("s1").await.unwrap();
}

// ============== Live Agent ==============

#[tokio::test]
#[ignore]
async fn test_live_agent_acquire_release() {
    let store = ConsulStore::new(ConsulConfig::default()).unwrap();
    let entry = SessionEntry {
        name: "consensusLockz".to_string(),
        behavior: SessionBehavior::Delete,
        ttl: "10s".to_string(),
        lock_delay: Duration::ZERO,
    };
    let session = store.session_create(&entry).await.unwrap();
    let pair = KvPair::new("lockz/live_test", b"{}".to_vec()).with_session(&session);

    assert!(store.kv_acquire(&pair).await.unwrap());
    store.session_destroy(&session).await.unwrap();

    let (pair, _) = store.kv_get("lockz/live_test", None).await.unwrap();
    assert!(pair.is_none());
}
