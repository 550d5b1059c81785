//! Unit tests for the client line protocol.

use acp_bridge::ipc::protocol::{
    decode_client_line, encode_line, ClientMessage, PermissionChoice, ServiceMessage,
};
use acp_bridge::AppError;

#[test]
fn full_prompt_decodes() {
    let line = r#"{"type":"prompt","session_id":"s1","prompt":"hi","mode_id":"coder","auto_approve":true,"allow_always":false,"show_tools":true,"strip_leading_newlines":true}"#;
    let Some(ClientMessage::Prompt(request)) = decode_client_line(line).expect("decode") else {
        panic!("expected prompt");
    };
    assert_eq!(request.requested_session(), Some("s1"));
    assert_eq!(request.requested_mode(), Some("coder"));
    assert!(request.auto_approve && request.show_tools && request.strip_leading_newlines);
    assert!(request.validate().is_ok());
}

#[test]
fn null_option_id_is_allowed() {
    let message = decode_client_line(r#"{"type":"permission_response","option_id":null}"#)
        .expect("decode");
    assert_eq!(
        message,
        Some(ClientMessage::PermissionResponse { option_id: None })
    );
}

#[test]
fn missing_type_is_rejected() {
    assert!(matches!(
        decode_client_line(r#"{"prompt":"hi"}"#),
        Err(AppError::Protocol(_))
    ));
}

#[test]
fn blank_line_is_nothing() {
    assert_eq!(decode_client_line("   ").expect("decode"), None);
}

#[test]
fn service_messages_wire_shapes() {
    assert_eq!(
        encode_line(&ServiceMessage::Done {
            session_id: "s1".into()
        })
        .expect("encode"),
        r#"{"type":"done","session_id":"s1"}"#
    );
    assert_eq!(
        encode_line(&ServiceMessage::PermissionRequest {
            title: "Write".into(),
            options: vec![PermissionChoice {
                option_id: "allow_once".into(),
                name: "Allow once".into()
            }],
        })
        .expect("encode"),
        r#"{"type":"permission_request","title":"Write","options":[{"option_id":"allow_once","name":"Allow once"}]}"#
    );
    assert_eq!(
        encode_line(&ServiceMessage::error(&AppError::Busy)).expect("encode"),
        r#"{"type":"error","message":"ACP service busy; try again later."}"#
    );
}

#[test]
fn only_done_and_error_are_terminal() {
    assert!(ServiceMessage::Done { session_id: "s".into() }.is_terminal());
    assert!(ServiceMessage::error(&AppError::Busy).is_terminal());
    assert!(!ServiceMessage::Chunk { text: "x".into() }.is_terminal());
}
