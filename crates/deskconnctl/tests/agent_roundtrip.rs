//! deskconnctl against a live in-process agent

use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use predicates::prelude::*;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use dc_agent::rpc::{Router, RpcServer};
use dc_agent::AgentState;
use dc_core::config::AgentConfig;
use dc_protocol::procedures;
use deskconnctl::commands::{pair, run_session, SessionEnd};
use deskconnctl::terminal::SessionSignals;
use deskconnctl::RpcClient;

struct TestAgent {
    _tmp: tempfile::TempDir,
    address: String,
    shutdown: CancellationToken,
}

impl TestAgent {
    async fn start() -> Self {
        let tmp = tempfile::tempdir().expect("Failed to create temp dir");
        let config = AgentConfig {
            data_dir: tmp.path().join("deskconn"),
            shell: Some("/bin/sh".to_string()),
            shell_env: vec![("TERM".to_string(), "dumb".to_string())],
            ..Default::default()
        };
        let state = Arc::new(AgentState::new(config));
        let shutdown = CancellationToken::new();

        let server = RpcServer::bind("127.0.0.1:0", Arc::new(Router::new(state)))
            .await
            .expect("Failed to bind")
            .with_shutdown_token(shutdown.clone());
        let address = server.local_addr().expect("No local address").to_string();
        tokio::spawn(server.run());

        Self {
            _tmp: tmp,
            address,
            shutdown,
        }
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn deskconnctl() -> Command {
    Command::cargo_bin("deskconnctl").expect("Failed to locate deskconnctl binary")
}

#[test]
fn test_cli_help() {
    deskconnctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deskconn agent"));
}

#[test]
fn test_cli_pair_help() {
    deskconnctl()
        .args(["pair", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("claim"))
        .stdout(predicate::str::contains("exchange"));
}

#[test]
fn test_cli_unreachable_agent() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    deskconnctl()
        .args(["--address", &address, "pair", "start"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to connect to agent"));
}

#[tokio::test]
async fn test_pairing_commands() {
    let agent = TestAgent::start().await;
    let mut client = RpcClient::connect(&agent.address).await.unwrap();

    let code = pair::start(&mut client).await.unwrap();
    assert_eq!(code.len(), 6);

    let err = pair::claim(&mut client, "phone", "not-it", None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Pairing failed: invalid code");

    // A mismatch does not consume the code
    let session_id = pair::claim(&mut client, "phone", &code, Some("Phone"))
        .await
        .unwrap();
    assert!(session_id.starts_with("phone-"));

    let agent_key = pair::exchange(&mut client, &session_id, "phone", &STANDARD.encode([9u8; 32]))
        .await
        .unwrap();
    assert_eq!(STANDARD.decode(agent_key).unwrap().len(), 32);

    let err = pair::exchange(&mut client, &session_id, "tablet", &STANDARD.encode([9u8; 32]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Pairing failed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shell_session_ends_when_shell_exits() {
    let agent = TestAgent::start().await;
    let client = RpcClient::connect(&agent.address).await.unwrap();

    let (tx, rx) = mpsc::channel(8);
    tx.send(Some(b"SIZE:90:20".to_vec())).await.unwrap();
    tx.send(Some(b"echo out-$((20+22)); exit\n".to_vec()))
        .await
        .unwrap();

    let call = client.progressive(procedures::SHELL, rx);
    let mut signals = SessionSignals::install().unwrap();
    let mut output = Vec::new();

    let end = timeout(
        Duration::from_secs(10),
        run_session(call, &tx, &mut signals, &mut output),
    )
    .await
    .expect("shell session did not end")
    .unwrap();

    assert_eq!(end, SessionEnd::Remote);
    assert!(String::from_utf8_lossy(&output).contains("out-42"));
}
