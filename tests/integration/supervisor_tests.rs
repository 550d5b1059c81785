//! Supervisor lifecycle against the scripted agent.

use std::sync::Arc;
use std::time::Duration;

use acp_bridge::acp::messages::{AcpRequest, SessionUpdate};
use acp_bridge::acp::spawner::SpawnConfig;
use acp_bridge::bridge::session::SessionRegistry;
use acp_bridge::bridge::supervisor::{
    ExchangeEvent, Lifecycle, ProcessLauncher, Supervisor, SupervisorOptions,
};
use acp_bridge::AppError;

use super::test_helpers::{test_options, Behavior, FakeLauncher};

fn supervisor(launcher: FakeLauncher) -> Supervisor {
    Supervisor::new(Arc::new(launcher), test_options())
}

#[tokio::test]
async fn start_publishes_running_generation() {
    let mut supervisor = supervisor(FakeLauncher::new(Behavior::Echo));
    let lifecycle = supervisor.subscribe();
    assert_eq!(*lifecycle.borrow(), Lifecycle::Stopped);

    supervisor.start().await.expect("start");
    assert_eq!(*lifecycle.borrow(), Lifecycle::Running { generation: 1 });
    assert!(supervisor.is_alive());

    supervisor.shutdown().await;
    assert_eq!(*lifecycle.borrow(), Lifecycle::Stopped);
    assert!(!supervisor.is_alive());
}

#[tokio::test]
async fn silent_agent_times_out_handshake() {
    let mut supervisor = Supervisor::new(
        Arc::new(FakeLauncher::new(Behavior::Silent)),
        SupervisorOptions {
            startup_timeout: Duration::from_millis(100),
            max_line_bytes: 1024,
        },
    );

    let err = supervisor.start().await.expect_err("handshake must time out");
    assert!(matches!(err, AppError::Spawn(ref msg) if msg.contains("handshake timeout")));
    assert!(!supervisor.is_alive());
}

#[tokio::test]
async fn missing_binary_fails_start() {
    let launcher = ProcessLauncher::new(SpawnConfig {
        program: "definitely-not-an-acp-agent-binary".into(),
        args: Vec::new(),
        cwd: ".".into(),
    });
    let mut supervisor = Supervisor::new(Arc::new(launcher), test_options());

    let err = supervisor.start().await.expect_err("spawn must fail");
    assert!(matches!(err, AppError::Spawn(_)));
    assert_eq!(supervisor.lifecycle(), Lifecycle::Stopped);
}

#[tokio::test]
async fn unsupported_agent_requests_get_method_not_found() {
    let mut supervisor = supervisor(FakeLauncher::new(Behavior::ProbeUnsupported));
    supervisor.start().await.expect("start");

    let created = supervisor
        .call(&AcpRequest::new_session(std::path::Path::new(".")))
        .await
        .expect("agent alive")
        .expect("session/new result");
    let session_id = created["sessionId"].as_str().expect("id").to_owned();

    let mut exchange = supervisor
        .send(&AcpRequest::Prompt {
            session_id: session_id.clone(),
            text: "read".into(),
        })
        .await
        .expect("send");

    let mut texts = Vec::new();
    loop {
        match exchange.next().await {
            ExchangeEvent::Update {
                update: SessionUpdate::AgentMessageChunk { text },
                ..
            } => texts.push(text),
            ExchangeEvent::Finished(outcome) => {
                outcome.expect("prompt result");
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(texts, ["code:-32601"]);
    supervisor.shutdown().await;
}

#[tokio::test]
async fn registry_forgets_sessions_after_crash() {
    let mut supervisor = supervisor(FakeLauncher::new(Behavior::CrashOnSecondPrompt));
    let mut registry = SessionRegistry::new(supervisor.subscribe());
    supervisor.start().await.expect("start");

    registry.record_created("sess-1-1");
    assert_eq!(registry.resolve(Some("sess-1-1")).as_deref(), Some("sess-1-1"));

    supervisor.mark_crashed("test");
    assert_eq!(
        supervisor.lifecycle(),
        Lifecycle::Crashed { generation: 1 }
    );
    assert_eq!(registry.resolve(Some("sess-1-1")), None);

    supervisor.ensure_running().await.expect("restart");
    assert_eq!(supervisor.generation(), 2);
    assert_eq!(registry.known_count(), 0);
    supervisor.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn exit_with_inherited_stdout_ends_the_request() {
    // The backgrounded `sleep` keeps the agent's stdout open after `sh` exits.
    let script = r#"read l; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":1}}'; (sleep 30 &); read l; exit 3"#;
    let launcher = ProcessLauncher::new(SpawnConfig {
        program: "sh".into(),
        args: vec!["-c".into(), script.into()],
        cwd: ".".into(),
    });
    let mut supervisor = Supervisor::new(Arc::new(launcher), test_options());
    supervisor.start().await.expect("handshake with sh agent");

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.call(&AcpRequest::new_session(std::path::Path::new("."))),
    )
    .await
    .expect("request must end when the agent exits");

    assert!(
        matches!(outcome, Err(AppError::SubprocessUnavailable(_))),
        "got {outcome:?}"
    );
    assert_eq!(supervisor.lifecycle(), Lifecycle::Crashed { generation: 1 });
    assert!(!supervisor.is_alive());
    supervisor.shutdown().await;
}

#[tokio::test]
async fn malformed_permission_request_is_answered() {
    let mut supervisor = supervisor(FakeLauncher::new(Behavior::MalformedPermission));
    supervisor.start().await.expect("start");

    let created = supervisor
        .call(&AcpRequest::new_session(std::path::Path::new(".")))
        .await
        .expect("agent alive")
        .expect("session/new result");
    let session_id = created["sessionId"].as_str().expect("id").to_owned();

    let mut exchange = supervisor
        .send(&AcpRequest::Prompt {
            session_id,
            text: "write".into(),
        })
        .await
        .expect("send");

    let mut texts = Vec::new();
    loop {
        match exchange.next().await {
            ExchangeEvent::Update {
                update: SessionUpdate::AgentMessageChunk { text },
                ..
            } => texts.push(text),
            ExchangeEvent::Finished(outcome) => {
                outcome.expect("prompt result");
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(texts, ["code:-32602"]);
    supervisor.shutdown().await;
}
