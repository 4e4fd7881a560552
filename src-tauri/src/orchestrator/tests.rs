use std::sync::Arc;

use serde_json::json;

use super::*;
use crate::credentials::{CredentialCache, KeyValueStore, MemoryKvStore, SessionStore};
use crate::test_support::{test_session, Harness, RecordingSink, ScriptedExecutor, ScriptedRelay};

const NEW_YORK: &str = "128.85.43.221";
const LONDON: &str = "4.251.118.138";

fn id(s: &str) -> ServerId {
    ServerId(s.to_string())
}

#[tokio::test]
async fn fresh_key_is_issued_and_handed_to_bring_up() {
    let h = Harness::new();
    h.issue("k1");

    let status = h.orchestrator.connect().await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert!(status.connected_since.is_some());
    assert!(status.last_error.is_none());

    let requests = h.relay.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/connect");
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, Some(json!({"server_ip": NEW_YORK})));
    assert_eq!(
        requests[0].headers.get("Authorization").map(String::as_str),
        Some("Bearer session-tok")
    );

    let calls = h.executor.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].program.ends_with("disconnect.sh"));
    assert_eq!(
        calls[1].args,
        vec![
            "tailscale",
            "up",
            "--login-server=http://128.85.43.221:8081",
            "--authkey",
            "k1",
        ]
    );
    assert_eq!(calls[2].args, vec!["tailscale", "set", "--exit-node", "100.64.0.12"]);

    assert_eq!(h.credentials.get(&id(NEW_YORK)).unwrap().as_deref(), Some("k1"));
}

#[tokio::test]
async fn transitions_are_published_in_order() {
    let h = Harness::new();
    h.issue("k1");

    h.orchestrator.connect().await.unwrap();
    h.orchestrator.disconnect();
    h.orchestrator.wait_for_teardown().await;

    let states: Vec<_> = h.sink.statuses().into_iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
}

#[tokio::test]
async fn reentrant_connect_fetches_and_brings_up_once() {
    let h = Harness::new();
    h.issue("k1");

    let (first, second) = tokio::join!(h.orchestrator.connect(), h.orchestrator.connect());
    assert_eq!(first.unwrap().state, ConnectionState::Connected);
    assert_eq!(second.unwrap().state, ConnectionState::Connecting);

    let third = h.orchestrator.connect().await.unwrap();
    assert_eq!(third.state, ConnectionState::Connected);

    assert_eq!(h.relay.call_count(), 1);
    assert_eq!(h.executor.calls_matching("tailscale up").len(), 1);
}

#[tokio::test]
async fn cached_key_skips_issuance() {
    let h = Harness::new();
    h.credentials.set(&id(NEW_YORK), "cached-key").unwrap();

    let status = h.orchestrator.connect().await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(h.relay.call_count(), 0);

    let bring_up = h.executor.calls_matching("tailscale up");
    assert_eq!(bring_up.len(), 1);
    assert!(bring_up[0].args.contains(&"cached-key".to_string()));
}

#[tokio::test]
async fn key_cached_for_another_server_is_not_used() {
    let h = Harness::new();
    h.credentials.set(&id(LONDON), "london-key").unwrap();
    h.issue("ny-key");

    h.orchestrator.connect().await.unwrap();

    assert_eq!(h.relay.call_count(), 1);
    let bring_up = h.executor.calls_matching("tailscale up");
    assert!(bring_up[0].args.contains(&"ny-key".to_string()));
    assert!(!bring_up[0].args.contains(&"london-key".to_string()));
    assert_eq!(h.credentials.get(&id(LONDON)).unwrap(), None);
}

#[tokio::test]
async fn network_failure_during_issuance_reverts_without_commands() {
    let h = Harness::new();
    h.relay
        .respond("/connect", Err(VpnError::NetworkError("connection refused".to_string())));

    let result = h.orchestrator.connect().await;
    assert!(matches!(result, Err(VpnError::NetworkError(_))));

    let status = h.orchestrator.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.last_error.unwrap().contains("connection refused"));
    assert!(h.executor.calls().is_empty());
    assert_eq!(h.relay.call_count(), 1);
}

#[tokio::test]
async fn server_error_during_issuance_reverts_without_commands() {
    let h = Harness::new();
    h.relay.respond("/connect", Ok((500, "internal error".to_string())));

    match h.orchestrator.connect().await {
        Err(VpnError::ApiError { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "internal error");
        }
        other => panic!("expected ApiError, got {:?}", other),
    }
    assert_eq!(h.orchestrator.status().state, ConnectionState::Disconnected);
    assert!(h.executor.calls().is_empty());
    assert_eq!(h.credentials.get(&id(NEW_YORK)).unwrap(), None);
}

#[tokio::test]
async fn response_without_key_is_parse_error() {
    let h = Harness::new();
    h.relay.respond("/connect", Ok((200, "{}".to_string())));

    let result = h.orchestrator.connect().await;
    assert!(matches!(result, Err(VpnError::ParseError(_))));
    assert_eq!(h.orchestrator.status().state, ConnectionState::Disconnected);
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn malformed_key_is_rejected_before_any_command() {
    let h = Harness::new();
    h.issue("k1 --reset");

    let result = h.orchestrator.connect().await;
    assert!(matches!(result, Err(VpnError::InvalidArgument(_))));
    assert_eq!(h.orchestrator.status().state, ConnectionState::Disconnected);
    assert!(h.executor.calls().is_empty());
    assert_eq!(h.credentials.get(&id(NEW_YORK)).unwrap(), None);
}

#[tokio::test]
async fn bring_up_failure_reverts_and_redacts_key() {
    let h = Harness::new();
    h.credentials.set(&id(NEW_YORK), "secret-key").unwrap();
    h.executor.fail("tailscale up");

    match h.orchestrator.connect().await {
        Err(VpnError::CommandFailed { command, .. }) => {
            assert!(!command.contains("secret-key"));
            assert!(command.contains("[REDACTED]"));
        }
        other => panic!("expected CommandFailed, got {:?}", other),
    }
    assert_eq!(h.orchestrator.status().state, ConnectionState::Disconnected);
    assert!(h.executor.calls_matching("--exit-node").is_empty());
    // A rejected key is not reused by the next attempt
    assert_eq!(h.credentials.get(&id(NEW_YORK)).unwrap(), None);
}

#[tokio::test]
async fn stale_teardown_failure_is_not_fatal() {
    let h = Harness::new();
    h.issue("k1");
    h.executor.fail("disconnect.sh");

    let status = h.orchestrator.connect().await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
}

#[tokio::test]
async fn exit_node_failure_keeps_connection() {
    let h = Harness::new();
    h.issue("k1");
    h.executor.fail("--exit-node");

    let status = h.orchestrator.connect().await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert!(status.last_error.unwrap().contains("--exit-node"));
}

#[tokio::test]
async fn exit_node_only_set_for_default_egress_server() {
    let h = Harness::new();
    h.orchestrator.select_server(&id(LONDON)).unwrap();
    h.issue("k2");

    h.orchestrator.connect().await.unwrap();

    assert!(h.executor.calls_matching("--exit-node").is_empty());
    let bring_up = h.executor.calls_matching("tailscale up");
    assert!(bring_up[0].args.contains(&"--login-server=http://4.251.118.138:8081".to_string()));
}

#[tokio::test]
async fn disconnect_is_immediate_even_when_teardown_fails() {
    let h = Harness::new();
    h.issue("k1");
    h.orchestrator.connect().await.unwrap();
    h.executor.fail("tailscale down");

    let status = h.orchestrator.disconnect();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.connected_since.is_none());

    let teardown = h.orchestrator.wait_for_teardown().await;
    assert!(matches!(teardown, Some(Err(VpnError::CommandFailed { .. }))));
    assert_eq!(h.orchestrator.status().state, ConnectionState::Disconnected);
    assert_eq!(h.sink.teardown_failures().len(), 1);
    // The script still ran before `down`
    assert_eq!(h.executor.calls_matching("disconnect.sh").len(), 2);
}

#[tokio::test]
async fn disconnect_when_not_connected_does_nothing() {
    let h = Harness::new();
    let status = h.orchestrator.disconnect();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(h.orchestrator.wait_for_teardown().await.is_none());
    assert!(h.executor.calls().is_empty());
    assert!(h.sink.statuses().is_empty());
}

#[tokio::test]
async fn reconnect_waits_for_previous_teardown() {
    let h = Harness::new();
    h.issue("k1");
    h.orchestrator.connect().await.unwrap();
    h.orchestrator.disconnect();
    h.orchestrator.connect().await.unwrap();

    let lines: Vec<String> = h.executor.calls().iter().map(|c| c.display()).collect();
    let down = lines.iter().position(|l| l.contains("tailscale down")).unwrap();
    let second_up = lines.iter().rposition(|l| l.contains("tailscale up")).unwrap();
    assert!(down < second_up, "teardown must finish before bring-up: {:?}", lines);
}

#[tokio::test]
async fn switching_while_disconnected_forces_new_key() {
    let h = Harness::new();
    h.issue("k1");
    h.orchestrator.connect().await.unwrap();
    h.orchestrator.disconnect();
    h.orchestrator.wait_for_teardown().await;

    let status = h.orchestrator.select_server(&id(LONDON)).unwrap();
    assert_eq!(status.server.address, LONDON);
    assert_eq!(h.credentials.get(&id(NEW_YORK)).unwrap(), None);
    assert_eq!(h.credentials.issued_for().unwrap(), None);

    h.orchestrator.connect().await.unwrap();
    let requests = h.relay.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].body, Some(json!({"server_ip": LONDON})));
}

#[tokio::test]
async fn reselecting_same_server_keeps_key() {
    let h = Harness::new();
    h.credentials.set(&id(NEW_YORK), "k1").unwrap();

    h.orchestrator.select_server(&id(NEW_YORK)).unwrap();
    assert_eq!(h.credentials.get(&id(NEW_YORK)).unwrap().as_deref(), Some("k1"));
}

#[tokio::test]
async fn switching_while_connected_is_refused() {
    let h = Harness::new();
    h.issue("k1");
    h.orchestrator.connect().await.unwrap();

    let result = h.orchestrator.select_server(&id(LONDON));
    assert!(matches!(result, Err(VpnError::InvalidOperation { .. })));

    let status = h.orchestrator.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.server.address, NEW_YORK);
    assert_eq!(h.credentials.get(&id(NEW_YORK)).unwrap().as_deref(), Some("k1"));
}

#[tokio::test]
async fn unknown_server_is_rejected() {
    let h = Harness::new();
    let result = h.orchestrator.select_server(&id("10.9.9.9"));
    assert!(matches!(result, Err(VpnError::ServerNotFound(_))));
}

#[tokio::test]
async fn connect_without_session_is_refused() {
    let h = Harness::with_settings(&AppSettings::default(), false);

    let result = h.orchestrator.connect().await;
    assert!(matches!(result, Err(VpnError::NotAuthenticated(_))));
    assert_eq!(h.orchestrator.status().state, ConnectionState::Disconnected);
    assert_eq!(h.relay.call_count(), 0);
    assert!(h.executor.calls().is_empty());
    assert!(h.sink.statuses().is_empty());
}

#[tokio::test]
async fn session_cleared_after_construction_is_noticed() {
    let h = Harness::new();
    h.sessions.clear_all().unwrap();

    let result = h.orchestrator.connect().await;
    assert!(matches!(result, Err(VpnError::NotAuthenticated(_))));
}

#[tokio::test]
async fn startup_selects_server_of_persisted_key() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
    let sessions = SessionStore::new(store.clone());
    let credentials = CredentialCache::new(store);
    sessions.save(&test_session()).unwrap();
    credentials.set(&id(LONDON), "london-key").unwrap();

    let relay = Arc::new(ScriptedRelay::new());
    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedExecutor::new()),
        relay.clone(),
        sessions,
        credentials,
        Arc::new(RecordingSink::default()),
        &AppSettings::default(),
    )
    .unwrap();

    assert_eq!(orchestrator.status().server.address, LONDON);
    orchestrator.connect().await.unwrap();
    assert_eq!(relay.call_count(), 0);
}

#[tokio::test]
async fn probe_reconciles_with_tunnel_status() {
    let h = Harness::new();
    h.executor
        .respond("tailscale status", Ok("100.64.0.7  laptop  ada@  linux  -".to_string()));

    let status = h.orchestrator.probe().await;
    assert_eq!(status.state, ConnectionState::Connected);
    assert!(status.connected_since.is_some());

    let status = h.orchestrator.probe().await;
    assert_eq!(status.state, ConnectionState::Connected);
    // Only the change was published
    assert_eq!(h.sink.statuses().len(), 1);
}

#[tokio::test]
async fn probe_failure_means_disconnected() {
    let h = Harness::new();
    h.issue("k1");
    h.orchestrator.connect().await.unwrap();
    h.executor.fail("tailscale status");

    let status = h.orchestrator.probe().await;
    assert_eq!(status.state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn settings_change_refused_while_connected() {
    let h = Harness::new();
    h.issue("k1");
    h.orchestrator.connect().await.unwrap();

    let result = h.orchestrator.apply_settings(&AppSettings::default());
    assert!(matches!(result, Err(VpnError::InvalidOperation { .. })));
}

#[tokio::test]
async fn settings_change_replaces_catalog_and_commands() {
    let h = Harness::new();
    h.credentials.set(&id(NEW_YORK), "k1").unwrap();

    let settings = AppSettings {
        use_sudo: false,
        servers: vec![ServerDescriptor::new("Tokyo", "vpn.tokyo.example", "Tokyo, JP", false)],
        ..Default::default()
    };
    let status = h.orchestrator.apply_settings(&settings).unwrap();
    assert_eq!(status.server.name, "Tokyo");
    assert_eq!(h.credentials.issued_for().unwrap(), None);
    assert_eq!(h.orchestrator.servers("").len(), 1);

    h.issue("k2");
    h.orchestrator.connect().await.unwrap();
    let bring_up = h.executor.calls_matching("tailscale up");
    assert_eq!(bring_up[0].program, "tailscale");
    assert_eq!(bring_up[0].args[1], "--login-server=http://vpn.tokyo.example:8081");
}

#[tokio::test]
async fn server_search_filters_catalog() {
    let h = Harness::new();
    let found = h.orchestrator.servers("new york");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].address, NEW_YORK);
}

#[tokio::test]
async fn session_ending_during_bring_up_rolls_back() {
    let h = Harness::new();
    h.issue("k1");

    let (connect, _) = tokio::join!(h.orchestrator.connect(), async {
        while h.executor.calls_matching("tailscale up").is_empty() {
            tokio::task::yield_now().await;
        }
        h.orchestrator.end_session();
        h.sessions.clear_all().unwrap();
    });

    assert!(matches!(connect, Err(VpnError::NotAuthenticated(_))));
    let status = h.orchestrator.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.connected_since.is_none());
    assert_eq!(h.credentials.issued_for().unwrap(), None);

    // The tunnel that came up is taken down again
    let lines: Vec<String> = h.executor.calls().iter().map(|c| c.display()).collect();
    let up = lines.iter().position(|l| l.contains("tailscale up")).unwrap();
    let down = lines.iter().position(|l| l.contains("tailscale down")).unwrap();
    assert!(up < down, "{:?}", lines);

    let states: Vec<_> = h.sink.statuses().into_iter().map(|s| s.state).collect();
    assert_eq!(states.last(), Some(&ConnectionState::Disconnected));
    assert!(!states.contains(&ConnectionState::Connected));
}

#[tokio::test]
async fn ending_session_while_connected_disconnects() {
    let h = Harness::new();
    h.issue("k1");
    h.orchestrator.connect().await.unwrap();

    let status = h.orchestrator.end_session();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(matches!(h.orchestrator.wait_for_teardown().await, Some(Ok(()))));
}

#[tokio::test]
async fn status_refresh_after_disconnect_waits_for_teardown() {
    let h = Harness::new();
    h.issue("k1");
    h.orchestrator.connect().await.unwrap();
    // The client still reports the tunnel until `down` has run
    h.executor
        .respond("tailscale status", Ok("100.64.0.7  laptop  ada@  linux  -".to_string()));

    h.orchestrator.disconnect();
    let status = h.orchestrator.probe().await;

    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(h.orchestrator.status().state, ConnectionState::Disconnected);
    assert_eq!(h.executor.calls_matching("tailscale down").len(), 1);
    assert!(h.executor.calls_matching("tailscale status").is_empty());
    assert!(h.orchestrator.wait_for_teardown().await.is_none());
}

#[tokio::test]
async fn disconnect_during_status_refresh_is_not_undone() {
    let h = Harness::new();
    h.issue("k1");
    h.orchestrator.connect().await.unwrap();
    h.executor
        .respond("tailscale status", Ok("100.64.0.7  laptop  ada@  linux  -".to_string()));

    let (refreshed, _) = tokio::join!(h.orchestrator.probe(), async {
        while h.executor.calls_matching("tailscale status").is_empty() {
            tokio::task::yield_now().await;
        }
        h.orchestrator.disconnect();
    });

    assert_eq!(refreshed.state, ConnectionState::Disconnected);
    assert_eq!(h.orchestrator.status().state, ConnectionState::Disconnected);
    h.orchestrator.wait_for_teardown().await;
    assert_eq!(h.orchestrator.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn panicked_teardown_task_does_not_propagate() {
    let task: TeardownTask = tokio::spawn(async { panic!("teardown task crashed") });
    finish_teardown(task).await;
}
