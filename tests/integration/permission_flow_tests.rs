//! Permission round-trips and client disconnects.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Notify;

use super::test_helpers::{chunk_texts, done_session, Behavior, TestBridge};

#[tokio::test]
async fn permission_request_pauses_until_client_answers() {
    let bridge = TestBridge::start(Behavior::AskPermission).await;
    let mut client = bridge.connect().await;

    client.prompt("write it", None).await;
    let question = client.recv().await;
    assert_eq!(question["type"], "permission_request");
    assert_eq!(question["title"], "Write file");
    assert_eq!(question["options"][0]["option_id"], "allow_once");
    assert_eq!(question["options"][2]["name"], "Reject");
    assert!(question["options"][0].get("kind").is_none(), "kind is agent-internal");

    client.permission_response(Some("reject_once")).await;
    let rest = client.until_terminal().await;
    assert_eq!(chunk_texts(&rest), ["outcome:reject_once"]);
    done_session(&rest);
    bridge.stop().await;
}

#[tokio::test]
async fn unknown_option_is_answered_as_cancelled() {
    let bridge = TestBridge::start(Behavior::AskPermission).await;
    let mut client = bridge.connect().await;

    client.prompt("write it", None).await;
    assert_eq!(client.recv().await["type"], "permission_request");
    client.permission_response(Some("allow_forever")).await;

    let rest = client.until_terminal().await;
    assert_eq!(chunk_texts(&rest), ["outcome:cancelled"]);
    done_session(&rest);
    bridge.stop().await;
}

#[tokio::test]
async fn auto_approve_answers_without_asking() {
    let bridge = TestBridge::start(Behavior::AskPermission).await;
    let mut client = bridge.connect().await;

    client
        .send(json!({ "type": "prompt", "prompt": "go", "auto_approve": true }))
        .await;
    let once = client.until_terminal().await;
    assert!(once.iter().all(|m| m["type"] != "permission_request"));
    assert_eq!(chunk_texts(&once), ["outcome:allow_once"]);

    client
        .send(json!({ "type": "prompt", "prompt": "go", "allow_always": true }))
        .await;
    let always = client.until_terminal().await;
    assert_eq!(chunk_texts(&always), ["outcome:allow_always"]);
    bridge.stop().await;
}

#[tokio::test]
async fn disconnect_while_permission_pending_frees_dispatcher() {
    let bridge = TestBridge::start(Behavior::AskPermission).await;

    let mut leaving = bridge.connect().await;
    leaving.prompt("write it", None).await;
    assert_eq!(leaving.recv().await["type"], "permission_request");
    drop(leaving);

    let mut next = bridge.connect().await;
    let messages = next
        .prompt_when_free(json!({ "type": "prompt", "prompt": "again", "auto_approve": true }))
        .await;
    assert_eq!(chunk_texts(&messages), ["outcome:allow_once"]);
    done_session(&messages);
    assert_eq!(bridge.stats.cancels(), 1, "abandoned prompt is cancelled");
    bridge.stop().await;
}

#[tokio::test]
async fn disconnect_mid_stream_runs_prompt_to_completion() {
    let gate = Arc::new(Notify::new());
    let bridge = TestBridge::start(Behavior::Gated(Arc::clone(&gate))).await;

    let mut leaving = bridge.connect().await;
    leaving.prompt("long task", None).await;
    assert_eq!(leaving.recv().await["text"], "working");
    drop(leaving);

    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.notify_one();

    let mut next = bridge.connect().await;
    let messages = next
        .prompt_when_free(json!({ "type": "prompt", "prompt": "next" }))
        .await;
    done_session(&messages);
    assert_eq!(bridge.stats.prompts(), 2);
    assert_eq!(bridge.stats.cancels(), 0);
    bridge.stop().await;
}
