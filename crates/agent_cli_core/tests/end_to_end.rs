//! End-to-end tests against the `fake_agent` test binary (§8 testable
//! properties), grounded on `codex/src/tests/support.rs`'s
//! scripted-binary pattern and `claude_code/examples/support/real_cli.rs`'s
//! resolve-a-binary convention.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use agent_cli_core::query::query;
use agent_cli_core::{AgentError, AgentOptions, Client, ProcessSpec};

fn fake_agent_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fake_agent"))
}

fn write_script(dir: &Path, lines: &[&str]) -> PathBuf {
    let path = dir.join("script.jsonl");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn process_spec(script: &Path, env: BTreeMap<String, String>) -> ProcessSpec {
    ProcessSpec {
        executable: fake_agent_path(),
        argv: vec![script.display().to_string()],
        working_dir: None,
        env,
    }
}

#[tokio::test]
async fn one_shot_query_closes_after_result_message() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        &[
            r#"{"type":"system","subtype":"init"}"#,
            r#"{"type":"assistant","message":{"content":"hi","model":"test-model"}}"#,
            r#"{"type":"result","subtype":"final","duration_ms":1,"duration_api_ms":1,"is_error":false,"num_turns":1,"session_id":"s1"}"#,
        ],
    );

    let mut q = query("hello", process_spec(&script, BTreeMap::new()), AgentOptions::default())
        .await
        .unwrap();

    let first = q.next().await.unwrap();
    assert!(!first.is_result());
    let second = q.next().await.unwrap();
    assert!(second.is_result());

    let err = q.next().await.unwrap_err();
    assert!(matches!(err, AgentError::NoMoreMessages));

    q.close().await.unwrap();
}

#[tokio::test]
async fn malformed_line_surfaces_as_parse_error_without_ending_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        &[
            r#"{"type":"not_a_real_envelope_kind"}"#,
            r#"{"type":"result","subtype":"final","duration_ms":1,"duration_api_ms":1,"is_error":false,"num_turns":1,"session_id":"s1"}"#,
        ],
    );

    let mut q = query("hello", process_spec(&script, BTreeMap::new()), AgentOptions::default())
        .await
        .unwrap();

    let first = q.next().await;
    assert!(matches!(first, Err(AgentError::Parse { .. })));

    let second = q.next().await.unwrap();
    assert!(second.is_result());

    q.close().await.unwrap();
}

#[tokio::test]
async fn streaming_client_survives_multiple_result_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        &[
            r#"{"type":"result","subtype":"turn1","duration_ms":1,"duration_api_ms":1,"is_error":false,"num_turns":1,"session_id":"s1"}"#,
            r#"{"type":"result","subtype":"turn2","duration_ms":1,"duration_api_ms":1,"is_error":false,"num_turns":2,"session_id":"s1"}"#,
        ],
    );

    let mut client = Client::new();
    client
        .connect(process_spec(&script, BTreeMap::new()), &AgentOptions::default())
        .await
        .unwrap();

    let first = client.receive_messages().await.unwrap().unwrap();
    assert!(first.is_result());
    let second = client.receive_messages().await.unwrap().unwrap();
    assert!(second.is_result());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn set_model_before_initialize_completes_is_rejected() {
    // `Client::connect` returns as soon as the transport/protocol are
    // attached; the `initialize` round trip itself is dispatched in
    // the background. Racing `set_model` immediately after `connect`
    // returns should observe the protocol still `Idle` and reject with
    // `ProtocolNotReady`, not silently wait for `initialize`.
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), &[]);

    let mut client = Client::new();
    client
        .connect(process_spec(&script, BTreeMap::new()), &AgentOptions::default())
        .await
        .unwrap();

    let err = client.set_model(Some("claude-other".to_string())).await.unwrap_err();
    assert!(matches!(err, AgentError::ProtocolNotReady { .. }));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn child_exiting_non_zero_surfaces_as_process_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        &[r#"{"type":"result","subtype":"final","duration_ms":1,"duration_api_ms":1,"is_error":false,"num_turns":1,"session_id":"s1"}"#],
    );
    let mut env = BTreeMap::new();
    env.insert("FAKE_AGENT_EXIT_CODE".to_string(), "3".to_string());

    let mut q = query("hello", process_spec(&script, env), AgentOptions::default())
        .await
        .unwrap();

    let first = q.next().await.unwrap();
    assert!(first.is_result());

    let second = q.next().await;
    match second {
        Err(AgentError::Process { exit_code, stderr }) => {
            assert_eq!(exit_code, Some(3));
            assert!(stderr.contains("fake_agent: started"));
        }
        other => panic!("expected a process error, got {other:?}"),
    }

    q.close().await.unwrap();
}

#[tokio::test]
async fn close_terminates_a_child_that_ignores_sigterm() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        &[r#"{"type":"result","subtype":"final","duration_ms":1,"duration_api_ms":1,"is_error":false,"num_turns":1,"session_id":"s1"}"#],
    );
    let mut env = BTreeMap::new();
    env.insert("FAKE_AGENT_IGNORE_SIGTERM".to_string(), "1".to_string());

    let mut q = query("hello", process_spec(&script, env), AgentOptions::default())
        .await
        .unwrap();
    let _ = q.next().await.unwrap();

    let started = Instant::now();
    q.close().await.unwrap();
    // Grace period + SIGTERM wait is 10s total; the fake agent would
    // otherwise sleep for 30s, so a close well under that bound proves
    // the SIGKILL fallback fired rather than the test merely outlasting
    // a cooperative child.
    assert!(started.elapsed() < Duration::from_secs(15));
}
