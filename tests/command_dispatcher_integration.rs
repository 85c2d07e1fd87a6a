//! Integration tests for the command dispatcher against a mocked
//! control plane: freshness filtering, idempotent replay, and the
//! GET-CONFIG/PUT-CONFIG flows.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use agent_watchdog::api_client::ApiClient;
use agent_watchdog::command_dispatcher::CommandDispatcher;
use agent_watchdog::error::ServiceControlError;
use agent_watchdog::service_control::{ServiceControl, ServiceState, StartReason};
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(server.uri(), "test-license", None).unwrap()
}

struct StubServiceControl;

impl ServiceControl for StubServiceControl {
    fn install(&self, _: &str, _: &str, _: &str, _: &str) -> Result<(), ServiceControlError> {
        Ok(())
    }
    fn remove(&self, _: &str) -> Result<(), ServiceControlError> {
        Ok(())
    }
    fn start(&self, _: &str, _: StartReason) -> Result<(), ServiceControlError> {
        Ok(())
    }
    fn stop(&self, _: &str) -> Result<(), ServiceControlError> {
        Ok(())
    }
    fn query(&self, _: &str) -> Result<ServiceState, ServiceControlError> {
        Ok(ServiceState::Running)
    }
}

/// Counts stop/start calls so the GET-CONFIG restart sequence can be
/// asserted on directly, rather than merely not erroring out.
#[derive(Default)]
struct CountingServiceControl {
    stop_calls: AtomicU32,
    start_calls: AtomicU32,
}

impl ServiceControl for CountingServiceControl {
    fn install(&self, _: &str, _: &str, _: &str, _: &str) -> Result<(), ServiceControlError> {
        Ok(())
    }
    fn remove(&self, _: &str) -> Result<(), ServiceControlError> {
        Ok(())
    }
    fn start(&self, _: &str, _: StartReason) -> Result<(), ServiceControlError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn stop(&self, _: &str) -> Result<(), ServiceControlError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn query(&self, _: &str) -> Result<ServiceState, ServiceControlError> {
        Ok(ServiceState::Running)
    }
}

/// Builds a config document whose `Endpoint` is the given control
/// plane, so the license check (now performed against the *candidate*
/// config's own endpoint) actually reaches the mock server in tests.
fn config_yaml(endpoint: &str, license: &str) -> String {
    format!("LicenseKey: {license}\nWebservice:\n  Endpoint: {endpoint}\n")
}

/// A command older than the freshness horizon must be ignored entirely
/// rather than replayed against a host that just reconnected.
#[tokio::test]
async fn stale_command_is_ignored() {
    let server = MockServer::start().await;
    let stale_ts = (Utc::now() - Duration::minutes(30)).to_rfc3339();
    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/command"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Ts": stale_ts, "Cmd": "stop"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::new();
    let mutex = Arc::new(Mutex::new(()));

    let result = dispatcher.check_for_command(dir.path(), "host1", &client, &StubServiceControl, "agent", mutex).await;
    assert!(result.is_ok());
}

/// GET-CONFIG with an invalid license in the downloaded config must be
/// rejected, and the current config must be left untouched.
#[tokio::test]
async fn get_config_rejects_invalid_license_and_preserves_current_config() {
    let server = MockServer::start().await;
    let fresh_ts = Utc::now().to_rfc3339();

    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/command"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Ts": fresh_ts, "Cmd": "GET-CONFIG"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/config"))
        .respond_with(ResponseTemplate::new(200).set_body_string(config_yaml(&server.uri(), "bad-license")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/license"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Valid": false, "Owner": ""
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let current_config_path = dir.path().join("Config/Config.yml");
    tokio::fs::create_dir_all(current_config_path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&current_config_path, config_yaml(&server.uri(), "good-license")).await.unwrap();

    let dispatcher = CommandDispatcher::new();
    let mutex = Arc::new(Mutex::new(()));
    let result = dispatcher.check_for_command(dir.path(), "host1", &client, &StubServiceControl, "agent", mutex).await;

    assert!(result.is_err());
    let preserved = tokio::fs::read_to_string(&current_config_path).await.unwrap();
    assert!(preserved.contains("good-license"));
}

/// GET-CONFIG with a valid license replaces the current config file.
#[tokio::test]
async fn get_config_applies_valid_config() {
    let server = MockServer::start().await;
    let fresh_ts = Utc::now().to_rfc3339();

    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/command"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Ts": fresh_ts, "Cmd": "GET-CONFIG"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/config"))
        .respond_with(ResponseTemplate::new(200).set_body_string(config_yaml(&server.uri(), "new-license")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/license"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Valid": true, "Owner": "acme corp"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let current_config_path = dir.path().join("Config/Config.yml");
    tokio::fs::create_dir_all(current_config_path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&current_config_path, config_yaml(&server.uri(), "old-license")).await.unwrap();

    let dispatcher = CommandDispatcher::new();
    let mutex = Arc::new(Mutex::new(()));
    dispatcher.check_for_command(dir.path(), "host1", &client, &StubServiceControl, "agent", mutex).await.unwrap();

    let applied = tokio::fs::read_to_string(&current_config_path).await.unwrap();
    assert!(applied.contains("new-license"));
}

/// An unrecognized command kind is surfaced as an error rather than
/// silently ignored, matching the original's explicit "unknown command"
/// branch.
#[tokio::test]
async fn unknown_command_is_reported_as_error() {
    let server = MockServer::start().await;
    let fresh_ts = Utc::now().to_rfc3339();
    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/command"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Ts": fresh_ts, "Cmd": "REBOOT"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::new();
    let mutex = Arc::new(Mutex::new(()));

    let result = dispatcher.check_for_command(dir.path(), "host1", &client, &StubServiceControl, "agent", mutex).await;
    assert!(result.is_err());
}

/// GET-CONFIG must validate the license against the *candidate*
/// config's own endpoint, not the endpoint currently in use. A host
/// whose current endpoint has a valid license must still reject a
/// candidate config that points at a different, invalid endpoint.
#[tokio::test]
async fn get_config_rejects_candidate_pointing_at_a_different_invalid_endpoint() {
    let current_server = MockServer::start().await;
    let candidate_server = MockServer::start().await;
    let fresh_ts = Utc::now().to_rfc3339();

    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/command"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Ts": fresh_ts, "Cmd": "GET-CONFIG"
        })))
        .mount(&current_server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/config"))
        .respond_with(ResponseTemplate::new(200).set_body_string(config_yaml(&candidate_server.uri(), "new-license")))
        .mount(&current_server)
        .await;
    // The *current* endpoint's own license is valid, which must not be
    // enough to accept a candidate pointing elsewhere.
    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/license"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Valid": true, "Owner": "acme corp"
        })))
        .mount(&current_server)
        .await;
    // The *candidate* endpoint's license is invalid.
    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/license"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Valid": false, "Owner": ""
        })))
        .mount(&candidate_server)
        .await;

    let client = client_for(&current_server);
    let dir = tempfile::tempdir().unwrap();
    let current_config_path = dir.path().join("Config/Config.yml");
    tokio::fs::create_dir_all(current_config_path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&current_config_path, config_yaml(&current_server.uri(), "good-license")).await.unwrap();

    let dispatcher = CommandDispatcher::new();
    let mutex = Arc::new(Mutex::new(()));
    let result = dispatcher.check_for_command(dir.path(), "host1", &client, &StubServiceControl, "agent", mutex).await;

    assert!(result.is_err());
    let preserved = tokio::fs::read_to_string(&current_config_path).await.unwrap();
    assert!(preserved.contains("good-license"));
}

/// GET-CONFIG must always upload the agent's own config back afterward,
/// and must restart the managed service (since it was running) under
/// the lifecycle mutex.
#[tokio::test]
async fn get_config_uploads_config_back_and_restarts_running_service() {
    let server = MockServer::start().await;
    let fresh_ts = Utc::now().to_rfc3339();

    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/command"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Ts": fresh_ts, "Cmd": "GET-CONFIG"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/config"))
        .respond_with(ResponseTemplate::new(200).set_body_string(config_yaml(&server.uri(), "new-license")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/v1/license"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Valid": true, "Owner": "acme corp"
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex("^/api/v1/config"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let current_config_path = dir.path().join("Config/Config.yml");
    tokio::fs::create_dir_all(current_config_path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&current_config_path, config_yaml(&server.uri(), "old-license")).await.unwrap();

    let dispatcher = CommandDispatcher::new();
    let mutex = Arc::new(Mutex::new(()));
    let control = CountingServiceControl::default();

    dispatcher.check_for_command(dir.path(), "host1", &client, &control, "agent", mutex).await.unwrap();

    assert_eq!(control.stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(control.start_calls.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.last_kind().await, Some(agent_watchdog::models::CommandKind::GetConfig));
}
