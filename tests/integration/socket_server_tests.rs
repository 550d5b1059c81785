//! Socket server behaviour outside the happy path: malformed input, idle
//! permission responses, validation, and socket file handling.

use std::os::unix::net::UnixListener;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use acp_bridge::bridge::dispatcher::Dispatcher;
use acp_bridge::bridge::supervisor::Supervisor;
use acp_bridge::ipc::server::{remove_stale_socket, spawn_server};
use acp_bridge::{AppError, BridgeConfig};

use super::test_helpers::{done_session, test_options, Behavior, FakeLauncher, TestBridge, TestClient};

#[tokio::test]
async fn malformed_line_gets_error_and_connection_closes() {
    let bridge = TestBridge::start(Behavior::Echo).await;
    let mut client = bridge.connect().await;

    client.send_raw("{not json").await;
    let error = client.recv().await;
    assert_eq!(error["type"], "error");
    assert!(error["message"]
        .as_str()
        .expect("message")
        .starts_with("invalid message:"));
    assert!(client.try_recv().await.is_none(), "connection closed");

    // Other connections are unaffected.
    let mut other = bridge.connect().await;
    other.prompt("hi", None).await;
    done_session(&other.until_terminal().await);
    bridge.stop().await;
}

#[tokio::test]
async fn unknown_message_type_is_malformed() {
    let bridge = TestBridge::start(Behavior::Echo).await;
    let mut client = bridge.connect().await;

    client.send(json!({ "type": "shutdown" })).await;
    assert_eq!(client.recv().await["type"], "error");
    assert!(client.try_recv().await.is_none());
    bridge.stop().await;
}

#[tokio::test]
async fn idle_permission_response_is_rejected_but_connection_stays() {
    let bridge = TestBridge::start(Behavior::Echo).await;
    let mut client = bridge.connect().await;

    client.permission_response(Some("allow_once")).await;
    let error = client.recv().await;
    assert_eq!(error["type"], "error");

    client.prompt("hi", None).await;
    done_session(&client.until_terminal().await);
    bridge.stop().await;
}

#[tokio::test]
async fn empty_prompt_is_rejected() {
    let bridge = TestBridge::start(Behavior::Echo).await;
    let mut client = bridge.connect().await;

    client.prompt("   ", None).await;
    let error = client.recv().await;
    assert_eq!(error["message"], "invalid message: prompt is required.");
    assert_eq!(bridge.stats.prompts(), 0);
    bridge.stop().await;
}

#[tokio::test]
async fn blank_lines_are_ignored() {
    let bridge = TestBridge::start(Behavior::Echo).await;
    let mut client = bridge.connect().await;

    client.send_raw("").await;
    client.prompt("hi", None).await;
    done_session(&client.until_terminal().await);
    bridge.stop().await;
}

#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = BridgeConfig::new("stale");
    config.socket_root = dir.path().to_path_buf();

    let stale = UnixListener::bind(config.socket_path()).expect("bind stale socket");
    drop(stale);
    assert!(config.socket_path().exists());

    let launcher = FakeLauncher::new(Behavior::Echo);
    let dispatcher = Dispatcher::new(
        Supervisor::new(Arc::new(launcher), test_options()),
        dir.path().to_path_buf(),
        CancellationToken::new(),
    );
    dispatcher.start().await.expect("agent starts");

    let ct = CancellationToken::new();
    let server = spawn_server(&config, dispatcher.clone(), ct.clone()).expect("server binds");

    let mut client = TestClient::connect(&config.socket_path()).await;
    client.prompt("hi", None).await;
    done_session(&client.until_terminal().await);

    ct.cancel();
    server.await.expect("server task");
    assert!(!config.socket_path().exists(), "socket removed on shutdown");
    dispatcher.shutdown().await;
}

#[test]
fn regular_file_at_socket_path_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("busy.sock");
    std::fs::write(&path, b"not a socket").expect("write file");

    let result = remove_stale_socket(&path);
    assert!(matches!(result, Err(AppError::Config(_))), "got {result:?}");
    assert!(path.exists(), "regular files are never deleted");
}

#[test]
fn missing_socket_path_is_fine() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(remove_stale_socket(&dir.path().join("none.sock")).is_ok());
}
