use httpmock::prelude::*;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use ad_sync_agent::config::{self, Config};
use ad_sync_agent::model::User;
use ad_sync_agent::platform::{PlatformClient, PlatformError, SyncReporter};

const SYNC_PATH: &str = "/api/tenants/tenant-1/sync/users";

fn client(server: &MockServer) -> PlatformClient {
    client_for(server.base_url())
}

/// Serves one connection: reads the request head, answers with `status` and a
/// body shorter than its declared length, then hangs up.
async fn truncated_response_server(status: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            head.extend_from_slice(&buf[..n]);
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-length: 100\r\nconnection: close\r\n\r\npartial"
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    });
    format!("http://{addr}")
}

fn client_for(base_url: String) -> PlatformClient {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.platform.url = base_url;
    cfg.platform.tenant_id = "tenant-1".into();
    cfg.platform.api_key = "secret-key".into();
    cfg.platform.request_timeout_secs = 5;
    cfg.platform.probe_timeout_secs = 5;
    PlatformClient::from_config(&cfg).unwrap()
}

fn users() -> Vec<User> {
    vec![
        User {
            email: "jane@x.com".into(),
            name: "Jane Doe".into(),
            active: true,
            groups: vec!["Engineers".into()],
            attributes: [("title".to_string(), "CTO".to_string())].into_iter().collect(),
        },
        User {
            email: "bob@x.com".into(),
            name: "bob".into(),
            active: false,
            groups: vec![],
            attributes: Default::default(),
        },
    ]
}

#[tokio::test]
async fn submit_posts_batch_and_parses_outcome() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(SYNC_PATH)
            .header("x-ad-sync-api-key", "secret-key")
            .header("content-type", "application/json")
            .json_body(json!({
                "users": [
                    {
                        "email": "jane@x.com",
                        "name": "Jane Doe",
                        "active": true,
                        "groups": ["Engineers"],
                        "attributes": { "title": "CTO" }
                    },
                    { "email": "bob@x.com", "name": "bob", "active": false }
                ]
            }));
        then.status(200).json_body(json!({
            "success": true,
            "message": "Synced 2 users: 1 created, 0 updated",
            "results": {
                "created": 1,
                "updated": 0,
                "errors": [{ "email": "bob@x.com", "error": "Unique constraint failed" }]
            }
        }));
    });

    let outcome = client(&server).submit(&users()).await.unwrap();

    mock.assert();
    assert_eq!(outcome.created, 1);
    assert_eq!(outcome.updated, 0);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].email, "bob@x.com");
    assert_eq!(outcome.errors[0].error, "Unique constraint failed");
}

#[tokio::test]
async fn empty_batch_makes_no_request() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.path(SYNC_PATH);
        then.status(200);
    });

    let outcome = client(&server).submit(&[]).await.unwrap();

    assert_eq!(mock.calls(), 0);
    assert_eq!(outcome.created, 0);
    assert_eq!(outcome.updated, 0);
    assert!(outcome.errors.is_empty());
}

#[tokio::test]
async fn server_error_carries_structured_message() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(SYNC_PATH);
        then.status(500).json_body(json!({ "error": "db down" }));
    });

    let err = client(&server).submit(&users()).await.unwrap_err();

    match &err {
        PlatformError::Protocol { status, message } => {
            assert_eq!(*status, 500);
            assert!(message.contains("db down"));
        }
        other => panic!("wrong error: {other:?}"),
    }
    assert!(err.to_string().contains("db down"));
}

#[tokio::test]
async fn non_json_error_body_is_kept_raw() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(SYNC_PATH);
        then.status(502).body("upstream unavailable");
    });

    let err = client(&server).submit(&users()).await.unwrap_err();
    match err {
        PlatformError::Protocol { status, message } => {
            assert_eq!(status, 502);
            assert_eq!(message, "upstream unavailable");
        }
        other => panic!("wrong error: {other:?}"),
    }
}

#[tokio::test]
async fn other_success_codes_are_rejected() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(SYNC_PATH);
        then.status(201)
            .json_body(json!({ "success": true, "message": "ok", "results": {} }));
    });

    let err = client(&server).submit(&users()).await.unwrap_err();
    assert!(matches!(err, PlatformError::Protocol { status: 201, .. }));
}

#[tokio::test]
async fn unparseable_success_body_is_protocol_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(SYNC_PATH);
        then.status(200).body("<html>maintenance</html>");
    });

    let err = client(&server).submit(&users()).await.unwrap_err();
    assert!(matches!(err, PlatformError::InvalidResponse(_)));
}

#[tokio::test]
async fn unreachable_platform_is_transport_error() {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.platform.url = "http://127.0.0.1:1".into();
    let client = PlatformClient::from_config(&cfg).unwrap();

    let err = client.submit(&users()).await.unwrap_err();
    assert!(matches!(err, PlatformError::Transport(_)));
}

#[tokio::test]
async fn probe_reads_tenant_info() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path(SYNC_PATH)
            .header("x-ad-sync-api-key", "secret-key");
        then.status(200)
            .json_body(json!({ "tenant": { "name": "Acme" }, "userCount": 17 }));
    });

    let info = client(&server).probe().await.unwrap();

    mock.assert();
    assert_eq!(info.tenant_name.as_deref(), Some("Acme"));
    assert_eq!(info.user_count, Some(17));
}

#[tokio::test]
async fn probe_ignores_body_shape() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(SYNC_PATH);
        then.status(200).body("pong");
    });

    let info = client(&server).probe().await.unwrap();
    assert_eq!(info.tenant_name, None);
    assert_eq!(info.user_count, None);
}

#[tokio::test]
async fn probe_rejects_bad_credentials() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(SYNC_PATH);
        then.status(401)
            .json_body(json!({ "error": "Invalid API key or AD sync is disabled" }));
    });

    let err = client(&server).probe().await.unwrap_err();
    match err {
        PlatformError::Protocol { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid API key or AD sync is disabled");
        }
        other => panic!("wrong error: {other:?}"),
    }
}

#[tokio::test]
async fn connectivity_check_truncated_error_body_is_transport_error() {
    let base = truncated_response_server("500 Internal Server Error").await;

    let err = client_for(base).probe().await.unwrap_err();
    assert!(matches!(err, PlatformError::Transport(_)), "got {err:?}");
}

#[tokio::test]
async fn connectivity_check_truncated_ok_body_still_succeeds() {
    let base = truncated_response_server("200 OK").await;

    let info = client_for(base).probe().await.unwrap();
    assert_eq!(info.tenant_name, None);
    assert_eq!(info.user_count, None);
}
