//! Integration tests for the Argo CD API client
//!
//! A local mock server stands in for Argo CD; these tests check request shape,
//! bearer authentication, response decoding and the retry policy for reads.

use mockito::{Matcher, Server};
use serde_json::json;
use tokio::time::Duration;

use argocd_mcp::argocd::client::SyncOptions;
use argocd_mcp::argocd::{ArgocdClient, ArgocdError};
use argocd_mcp::types::{ApplicationName, ArgocdCredentials};

fn client_for(server: &Server) -> ArgocdClient {
    let credentials = ArgocdCredentials::new(server.url(), "secret-token");
    ArgocdClient::new(&credentials, Some(Duration::from_secs(5))).expect("valid test client")
}

/// Listing applications sends the bearer token and flattens the response
#[tokio::test]
async fn test_list_applications() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/applications")
        .match_header("authorization", "Bearer secret-token")
        .match_query(Matcher::UrlEncoded("search".into(), "guest".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "items": [{
                    "metadata": {"name": "guestbook", "namespace": "argocd"},
                    "spec": {"project": "default"},
                    "status": {"sync": {"status": "OutOfSync"}, "health": {"status": "Degraded"}}
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let apps = client_for(&server)
        .list_applications(Some("guest"))
        .await
        .expect("list succeeds");

    mock.assert_async().await;
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].name.as_str(), "guestbook");
    assert_eq!(apps[0].sync_status.as_deref(), Some("OutOfSync"));
    assert_eq!(apps[0].health_status.as_deref(), Some("Degraded"));
}

/// The resource tree is returned as raw JSON
#[tokio::test]
async fn test_get_application_resource_tree() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/applications/guestbook/resource-tree")
        .with_status(200)
        .with_body(json!({"nodes": [{"kind": "Deployment", "name": "web"}]}).to_string())
        .create_async()
        .await;

    let tree = client_for(&server)
        .get_application_resource_tree(&ApplicationName::from("guestbook"))
        .await
        .expect("tree succeeds");

    mock.assert_async().await;
    assert_eq!(tree["nodes"][0]["kind"], "Deployment");
}

/// Server errors on reads are retried until the attempts run out
#[tokio::test]
async fn test_reads_retry_server_errors() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/applications/guestbook")
        .with_status(503)
        .with_body("unavailable")
        .expect(2)
        .create_async()
        .await;

    let result = client_for(&server)
        .with_max_attempts(2)
        .get_application(&ApplicationName::from("guestbook"))
        .await;

    mock.assert_async().await;
    match result {
        Err(ArgocdError::Status { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "unavailable");
        }
        other => panic!("expected a status error, got {:?}", other),
    }
}

/// Client errors are returned at once
#[tokio::test]
async fn test_reads_do_not_retry_client_errors() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/applications/missing/managed-resources")
        .with_status(404)
        .with_body(json!({"error": "not found"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let result = client_for(&server)
        .get_application_managed_resources(&ApplicationName::from("missing"))
        .await;

    mock.assert_async().await;
    assert!(matches!(result, Err(ArgocdError::Status { status: 404, .. })));
}

/// A sync posts its options once
#[tokio::test]
async fn test_sync_application_posts_options() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/applications/guestbook/sync")
        .match_header("authorization", "Bearer secret-token")
        .match_body(Matcher::Json(json!({"revision": "main", "prune": true})))
        .with_status(200)
        .with_body(json!({"metadata": {"name": "guestbook"}}).to_string())
        .expect(1)
        .create_async()
        .await;

    let options = SyncOptions {
        revision: Some("main".to_string()),
        prune: Some(true),
        dry_run: None,
    };
    let result = client_for(&server)
        .sync_application(&ApplicationName::from("guestbook"), &options)
        .await
        .expect("sync succeeds");

    mock.assert_async().await;
    assert_eq!(result["metadata"]["name"], "guestbook");
}

/// Unusable credentials are refused before any request is made
#[test]
fn test_client_rejects_incomplete_credentials() {
    let missing_url = ArgocdCredentials::new("", "token");
    assert!(matches!(
        ArgocdClient::new(&missing_url, None),
        Err(ArgocdError::InvalidBaseUrl(_))
    ));

    let missing_token = ArgocdCredentials::new("https://cd.example.com", "");
    assert!(matches!(
        ArgocdClient::new(&missing_token, None),
        Err(ArgocdError::MissingToken)
    ));
}
