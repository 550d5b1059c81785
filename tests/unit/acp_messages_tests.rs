//! Unit tests for ACP request envelopes and inbound classification.

use std::path::Path;

use serde_json::{json, Value};

use acp_bridge::acp::messages::{
    cancel_notification, invalid_params, method_not_found, parse_inbound_line,
    permission_response, AcpInbound, AcpRequest, SessionUpdate, StopReason, INVALID_PARAMS,
    METHOD_NOT_FOUND,
};
use acp_bridge::AppError;

fn parse(value: &Value) -> Option<AcpInbound> {
    parse_inbound_line(&value.to_string()).expect("parse")
}

#[test]
fn prompt_envelope_uses_acp_field_names() {
    let envelope = AcpRequest::Prompt {
        session_id: "s1".into(),
        text: "hello".into(),
    }
    .to_envelope(7);
    assert_eq!(
        envelope,
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "session/prompt",
            "params": { "sessionId": "s1", "prompt": [{ "type": "text", "text": "hello" }] }
        })
    );
}

#[test]
fn new_session_sends_cwd_and_no_mcp_servers() {
    let envelope = AcpRequest::new_session(Path::new("/srv/agent")).to_envelope(2);
    assert_eq!(envelope["method"], "session/new");
    assert_eq!(envelope["params"], json!({ "cwd": "/srv/agent", "mcpServers": [] }));
}

#[test]
fn initialize_disables_client_capabilities() {
    let envelope = AcpRequest::Initialize.to_envelope(1);
    assert_eq!(envelope["params"]["protocolVersion"], 1);
    assert_eq!(envelope["params"]["clientCapabilities"]["terminal"], false);
    assert_eq!(envelope["params"]["clientInfo"]["name"], "acp-bridge");
}

#[test]
fn permission_answers_and_cancel_shapes() {
    assert_eq!(
        permission_response(&json!("p1"), Some("allow_once"))["result"],
        json!({ "outcome": { "outcome": "selected", "optionId": "allow_once" } })
    );
    assert_eq!(
        permission_response(&json!(3), None)["result"],
        json!({ "outcome": { "outcome": "cancelled" } })
    );
    assert_eq!(
        cancel_notification("s1"),
        json!({ "jsonrpc": "2.0", "method": "session/cancel", "params": { "sessionId": "s1" } })
    );
    assert_eq!(
        method_not_found(&json!(5), "fs/read_text_file")["error"]["code"],
        METHOD_NOT_FOUND
    );
}

#[test]
fn response_with_result_and_error() {
    let ok = parse(&json!({ "jsonrpc": "2.0", "id": 4, "result": { "stopReason": "refusal" } }));
    let Some(AcpInbound::Response { id, outcome }) = ok else {
        panic!("expected response");
    };
    assert_eq!(id, Some(4));
    assert_eq!(
        StopReason::from_result(&outcome.expect("result")),
        StopReason::Refusal
    );

    let failed = parse(&json!({
        "jsonrpc": "2.0",
        "id": 5,
        "error": { "code": -32603, "message": "Session not found" }
    }));
    let Some(AcpInbound::Response { outcome, .. }) = failed else {
        panic!("expected response");
    };
    assert!(outcome.expect_err("rpc error").is_session_not_found());
}

#[test]
fn tool_title_falls_back_to_call_id() {
    let inbound = parse(&json!({
        "jsonrpc": "2.0",
        "method": "session/update",
        "params": {
            "sessionId": "s1",
            "update": { "sessionUpdate": "tool_call_update", "toolCallId": "call-7" }
        }
    }));
    assert_eq!(
        inbound,
        Some(AcpInbound::SessionUpdate {
            session_id: "s1".into(),
            update: SessionUpdate::ToolCallUpdate {
                title: "call-7".into()
            },
        })
    );
}

#[test]
fn permission_request_is_classified() {
    let inbound = parse(&json!({
        "jsonrpc": "2.0",
        "id": "perm-1",
        "method": "session/request_permission",
        "params": {
            "sessionId": "s1",
            "toolCall": { "toolCallId": "c1" },
            "options": [{ "optionId": "allow_once", "kind": "allow_once" }]
        }
    }));
    let Some(AcpInbound::PermissionRequest(question)) = inbound else {
        panic!("expected permission request");
    };
    assert_eq!(question.id, json!("perm-1"));
    assert_eq!(question.title, "tool execution");
    assert_eq!(question.options[0].name, "allow_once");
}

#[test]
fn unknown_requests_and_notifications() {
    let request = parse(&json!({ "jsonrpc": "2.0", "id": 9, "method": "terminal/create", "params": {} }));
    assert_eq!(
        request,
        Some(AcpInbound::UnsupportedRequest {
            id: json!(9),
            method: "terminal/create".into()
        })
    );
    assert_eq!(parse(&json!({ "jsonrpc": "2.0", "method": "heartbeat" })), None);
}

#[test]
fn permission_request_with_bad_params_still_needs_an_answer() {
    let inbound = parse(&json!({
        "jsonrpc": "2.0",
        "id": "perm-2",
        "method": "session/request_permission",
        "params": { "toolCall": { "title": "Write file" }, "options": [] }
    }));
    let Some(AcpInbound::InvalidRequest { id, method, reason }) = inbound else {
        panic!("expected invalid request, got {inbound:?}");
    };
    assert_eq!(id, json!("perm-2"));
    assert_eq!(method, "session/request_permission");
    assert!(reason.contains("sessionId"), "{reason}");

    let answer = invalid_params(&id, &method, &reason);
    assert_eq!(answer["id"], "perm-2");
    assert_eq!(answer["error"]["code"], INVALID_PARAMS);
}

#[test]
fn malformed_lines_are_acp_errors() {
    assert!(matches!(parse_inbound_line("{oops"), Err(AppError::Acp(_))));
    assert!(matches!(parse_inbound_line("{}"), Err(AppError::Acp(_))));
    assert!(matches!(
        parse_inbound_line(r#"{"method":"session/update","params":{}}"#),
        Err(AppError::Acp(_))
    ));
}
