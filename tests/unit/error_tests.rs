//! Unit tests for `AppError` display and client-facing messages.

use acp_bridge::AppError;

#[test]
fn display_carries_category_prefix() {
    assert_eq!(AppError::Acp("stream closed".into()).to_string(), "acp: stream closed");
    assert_eq!(AppError::Spawn("not found".into()).to_string(), "spawn: not found");
    assert_eq!(AppError::Busy.to_string(), "busy");
}

#[test]
fn busy_and_unavailable_have_fixed_wire_text() {
    assert_eq!(
        AppError::Busy.client_message(),
        "ACP service busy; try again later."
    );
    assert_eq!(
        AppError::SubprocessUnavailable("agent stdout closed".into()).client_message(),
        "ACP agent process is unavailable; the request was not completed."
    );
}

#[test]
fn refusal_names_the_session() {
    assert_eq!(
        AppError::Refused("sess-9".into()).client_message(),
        "ACP prompt refused for session sess-9"
    );
}

#[test]
fn other_errors_are_wrapped() {
    let message = AppError::SessionLost("Session not found".into()).client_message();
    assert_eq!(message, "ACP service error: session lost: Session not found");
}

#[test]
fn io_errors_convert() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg == "pipe"));
}
