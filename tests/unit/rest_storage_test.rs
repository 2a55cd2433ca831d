//! Tests for the REST storage client.
//!
//! Request construction is checked directly; the request/response cycle runs
//! against a one-shot HTTP responder on a local port.

use marksync::services::rest_storage::{status_error, RestStorage};
use marksync::services::storage::BookmarkStorage;
use marksync::types::bookmark::{DeleteOutcome, NewBookmark};
use marksync::types::errors::StorageError;
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const ROW: &str = concat!(
    r#"{"id":"bk-1","user_id":"alice","title":"Rust","url":"https://rust-lang.org","#,
    r#""created_at":"2024-05-01T12:00:00.123456+00:00","#,
    r#""updated_at":"2024-05-01T12:00:00.123456+00:00"}"#
);

fn client(base: &str, token: Option<&str>) -> RestStorage {
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    RestStorage::new(base, "anon-key", token).unwrap().with_client(http)
}

fn query_pairs(url: &url::Url) -> Vec<(String, String)> {
    url.query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Answers one request with `status` and `body`; the handle yields the raw
/// request text, lowercased.
async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = header_end(&buf) {
                let head = String::from_utf8_lossy(&buf[..end]).to_string();
                if buf.len() >= end + 4 + content_length(&head) {
                    break;
                }
            }
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        String::from_utf8_lossy(&buf).to_lowercase()
    });

    (format!("http://{}", addr), handle)
}

// ---------------------------------------------------------------------------
// Request construction
// ---------------------------------------------------------------------------

#[test]
fn test_list_url_filters_by_owner_newest_first() {
    let storage = client("https://project.example.co", None);
    let url = storage.list_url("alice");

    assert_eq!(url.path(), "/rest/v1/bookmarks");
    assert_eq!(
        query_pairs(&url),
        vec![
            ("select".to_string(), "*".to_string()),
            ("user_id".to_string(), "eq.alice".to_string()),
            ("order".to_string(), "created_at.desc".to_string()),
        ]
    );
}

#[test]
fn test_delete_url_targets_one_id() {
    let storage = client("https://project.example.co", None);
    let url = storage.delete_url("bk-1");
    assert_eq!(
        query_pairs(&url),
        vec![("id".to_string(), "eq.bk-1".to_string())]
    );
}

#[test]
fn test_base_url_path_is_kept() {
    let storage = client("http://localhost:8000/api", None);
    assert_eq!(
        storage.table_url().as_str(),
        "http://localhost:8000/api/rest/v1/bookmarks"
    );
}

#[test]
fn test_invalid_base_url_is_rejected() {
    assert!(matches!(
        RestStorage::new("not a base url", "key", None),
        Err(StorageError::Network(_))
    ));
}

#[test]
fn test_auth_headers_prefer_access_token() {
    let with_token = client("https://p.example.co", Some("user-jwt"));
    let headers = with_token.auth_headers();
    assert_eq!(headers.get("apikey").unwrap(), "anon-key");
    assert_eq!(headers.get("authorization").unwrap(), "Bearer user-jwt");

    let anonymous = client("https://p.example.co", None);
    assert_eq!(
        anonymous.auth_headers().get("authorization").unwrap(),
        "Bearer anon-key"
    );
}

#[test]
fn test_status_error_mapping() {
    assert!(matches!(
        status_error(StatusCode::UNAUTHORIZED, "jwt expired"),
        StorageError::Rejected(msg) if msg.contains("jwt expired")
    ));
    assert!(matches!(
        status_error(StatusCode::CONFLICT, ""),
        StorageError::Rejected(_)
    ));
    assert!(matches!(
        status_error(StatusCode::BAD_GATEWAY, ""),
        StorageError::Network(_)
    ));
}

// ---------------------------------------------------------------------------
// Round trips against a local responder
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_list_decodes_rows() {
    let (base, request) = serve_once("200 OK", &format!("[{}]", ROW)).await;
    let storage = client(&base, Some("user-jwt"));

    let rows = storage.list("alice").await.unwrap();
    let raw = request.await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "bk-1");
    assert_eq!(rows[0].owner, "alice");
    assert!(raw.starts_with("get /rest/v1/bookmarks?"));
    assert!(raw.contains("user_id=eq.alice"));
    assert!(raw.contains("apikey: anon-key"));
    assert!(raw.contains("authorization: bearer user-jwt"));
}

#[tokio::test]
async fn test_create_posts_json_and_returns_stored_row() {
    let (base, request) = serve_once("201 Created", &format!("[{}]", ROW)).await;
    let storage = client(&base, None);

    let record = storage
        .create(NewBookmark {
            user_id: "alice".to_string(),
            title: "Rust".to_string(),
            url: "https://rust-lang.org".to_string(),
        })
        .await
        .unwrap();
    let raw = request.await.unwrap();

    assert_eq!(record.id, "bk-1");
    assert!(raw.starts_with("post /rest/v1/bookmarks "));
    assert!(raw.contains("prefer: return=representation"));
    assert!(raw.contains(r#""user_id":"alice""#));
}

#[tokio::test]
async fn test_delete_with_empty_result_is_not_found() {
    let (base, request) = serve_once("200 OK", "[]").await;
    let storage = client(&base, None);

    assert_eq!(storage.delete("bk-9").await.unwrap(), DeleteOutcome::NotFound);
    assert!(request.await.unwrap().starts_with("delete /rest/v1/bookmarks?id=eq.bk-9"));
}

#[tokio::test]
async fn test_delete_with_row_is_deleted() {
    let (base, _request) = serve_once("200 OK", &format!("[{}]", ROW)).await;
    let storage = client(&base, None);
    assert_eq!(storage.delete("bk-1").await.unwrap(), DeleteOutcome::Deleted);
}

#[tokio::test]
async fn test_http_errors_map_to_storage_errors() {
    let (base, _request) = serve_once("401 Unauthorized", r#"{"message":"jwt expired"}"#).await;
    let err = client(&base, None).list("alice").await.unwrap_err();
    assert!(matches!(err, StorageError::Rejected(_)), "got {:?}", err);

    let (base, _request) = serve_once("503 Service Unavailable", "").await;
    let err = client(&base, None).list("alice").await.unwrap_err();
    assert!(matches!(err, StorageError::Network(_)), "got {:?}", err);

    let (base, _request) = serve_once("200 OK", r#"{"not":"an array"}"#).await;
    let err = client(&base, None).list("alice").await.unwrap_err();
    assert!(matches!(err, StorageError::Decode(_)), "got {:?}", err);
}
