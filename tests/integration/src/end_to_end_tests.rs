//! End-to-end tests for the full stack
//!
//! Each test writes a real config file, loads [`Settings`] from it, and talks
//! JSON-RPC to a [`ReplicaMcpServer`] whose stores are live HTTP fakes and
//! whose sync procedures are shell stubs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pretty_assertions::assert_eq;
use replica_core::{Overrides, Settings};
use replica_mcp::{Dispatcher, ReplicaMcpServer};
use replica_test_utils::{FakeStoreServer, closed_port_url, write_log, write_stub_script};
use serde_json::{Value, json};
use tempfile::TempDir;

// =============================================================================
// Test Infrastructure
// =============================================================================

/// A temp workspace holding the config file, both stub procedures and the log dir
struct Deployment {
    temp: TempDir,
    config: Vec<String>,
    forward_body: String,
    reverse_body: String,
}

impl Deployment {
    fn new(local_url: &str, remote_url: &str) -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            config: vec![
                "# replica sync endpoints".to_string(),
                format!("SOURCE_REST_URL={}", local_url),
                format!("TARGET_REST_URL=\"{}/\"", remote_url),
            ],
            forward_body: "exit 0\n".to_string(),
            reverse_body: "exit 0\n".to_string(),
        }
    }

    fn config_line(mut self, line: &str) -> Self {
        self.config.push(line.to_string());
        self
    }

    fn forward(mut self, body: &str) -> Self {
        self.forward_body = body.to_string();
        self
    }

    fn reverse(mut self, body: &str) -> Self {
        self.reverse_body = body.to_string();
        self
    }

    fn path(&self) -> &Path {
        self.temp.path()
    }

    fn log_dir(&self) -> PathBuf {
        self.path().join("logs")
    }

    fn settings(&self) -> Settings {
        let config_path = self.path().join("config.env");
        fs::write(&config_path, self.config.join("\n")).unwrap();
        let overrides = Overrides {
            config_path: Some(config_path),
            forward_script: Some(write_stub_script(self.path(), "to-remote.sh", &self.forward_body)),
            reverse_script: Some(write_stub_script(self.path(), "from-remote.sh", &self.reverse_body)),
            log_dir: Some(self.log_dir()),
        };
        Settings::load(&overrides).unwrap()
    }

    fn server(&self) -> ReplicaMcpServer {
        ReplicaMcpServer::new(Dispatcher::from_settings(&self.settings()).unwrap())
    }
}

/// Call a tool and return (is_error, decoded payload)
async fn call_tool(server: &ReplicaMcpServer, id: u64, name: &str, arguments: Value) -> (bool, Value) {
    let request = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments},
    });
    let line = server
        .handle_message(&request.to_string())
        .await
        .expect("tools/call must be answered");
    let response: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["id"], id);

    let result = &response["result"];
    let text = result["content"][0]["text"].as_str().unwrap();
    (
        result["isError"] == json!(true),
        serde_json::from_str(text).unwrap(),
    )
}

fn entry<'a>(comparison: &'a Value, name: &str) -> &'a Value {
    comparison["collections"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["name"] == name)
        .unwrap_or_else(|| panic!("no entry for {}", name))
}

// =============================================================================
// Session lifecycle
// =============================================================================

#[tokio::test]
async fn test_handshake_then_tool_listing() {
    let local = FakeStoreServer::start().await;
    let remote = FakeStoreServer::start().await;
    let server = Deployment::new(&local.url(), &remote.url()).server();

    let init = server
        .handle_message(r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"it","version":"0"}}}"#)
        .await
        .unwrap();
    let init: Value = serde_json::from_str(&init).unwrap();
    assert_eq!(init["result"]["serverInfo"]["name"], "replica-mcp");

    assert!(
        server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none()
    );

    let list = server
        .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
        .await
        .unwrap();
    let list: Value = serde_json::from_str(&list).unwrap();
    let mut names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            "compare_collections",
            "sync_all",
            "sync_collection",
            "sync_dry_run",
            "sync_from_remote_all",
            "sync_from_remote_collection",
            "sync_from_remote_dry_run",
            "sync_logs",
            "sync_status",
        ]
    );
}

// =============================================================================
// Reconciliation against live HTTP stores
// =============================================================================

#[tokio::test]
async fn test_mixed_inventories_compare() {
    let local = FakeStoreServer::with_collections(&[("A", 10), ("B", 5)]).await;
    let remote = FakeStoreServer::with_collections(&[("A", 10), ("C", 3)]).await;
    remote.require_api_key("s3cret");
    let server = Deployment::new(&local.url(), &remote.url())
        .config_line("TARGET_API_KEY='s3cret'  # remote credential")
        .server();

    let (is_error, comparison) = call_tool(&server, 1, "compare_collections", json!({})).await;

    assert!(!is_error);
    assert_eq!(
        comparison["summary"],
        json!({
            "total_collections": 3,
            "local_collections": 2,
            "remote_collections": 2,
            "out_of_sync": 2,
            "total_local_points": 15,
            "total_remote_points": 13,
            "total_difference": 2,
        })
    );

    let a = entry(&comparison, "A");
    assert_eq!(a["in_sync"], true);
    assert_eq!(a["difference"], 0);

    let b = entry(&comparison, "B");
    assert_eq!(b["local_only"], true);
    assert_eq!(b["difference"], 5);

    let c = entry(&comparison, "C");
    assert_eq!(c["remote_only"], true);
    assert_eq!(c["difference"], -3);
}

#[tokio::test]
async fn test_wrong_credential_shows_as_remote_fault() {
    let local = FakeStoreServer::with_collections(&[("A", 1)]).await;
    let remote = FakeStoreServer::with_collections(&[("A", 1)]).await;
    remote.require_api_key("right");
    let server = Deployment::new(&local.url(), &remote.url())
        .config_line("TARGET_API_KEY=wrong")
        .server();

    let (is_error, status) = call_tool(&server, 1, "sync_status", json!({})).await;

    assert!(!is_error);
    assert_eq!(status["ready"], false);
    assert_eq!(status["remote"]["status"], "error");
    assert_eq!(status["remote"]["http_status"], 401);
    assert_eq!(status["local"]["status"], "connected");
}

#[tokio::test]
async fn test_unreachable_remote() {
    let local = FakeStoreServer::with_collections(&[("A", 10), ("B", 5)]).await;
    let remote_url = closed_port_url().await;
    let server = Deployment::new(&local.url(), &remote_url)
        .config_line("REQUEST_TIMEOUT_SECS=2")
        .server();

    let (_, status) = call_tool(&server, 1, "sync_status", json!({})).await;
    assert_eq!(status["ready"], false);
    assert_eq!(status["remote"]["status"], "unreachable");
    assert!(status["remote"]["error"].is_string());

    let (is_error, comparison) = call_tool(&server, 2, "compare_collections", json!({})).await;
    assert!(!is_error);
    for (name, points) in [("A", 10), ("B", 5)] {
        let e = entry(&comparison, name);
        assert_eq!(e["local_only"], true);
        assert_eq!(e["difference"], points);
    }
    assert_eq!(comparison["summary"]["total_difference"], 15);
}

#[tokio::test]
async fn test_compare_single_collection_over_http() {
    let local = FakeStoreServer::with_collections(&[("notes", 42)]).await;
    let remote = FakeStoreServer::with_collections(&[("notes", 40)]).await;
    remote.set_collection_status("notes", "yellow");
    let server = Deployment::new(&local.url(), &remote.url()).server();

    let (_, comparison) = call_tool(
        &server,
        1,
        "compare_collections",
        json!({"collection_name": "notes"}),
    )
    .await;

    assert_eq!(comparison["collection"], "notes");
    assert_eq!(comparison["entry"]["difference"], 2);
    assert_eq!(comparison["remote"]["status"], "yellow");
    assert_eq!(remote.requests(), vec!["/collections/notes".to_string()]);
}

// =============================================================================
// Sync procedures
// =============================================================================

#[tokio::test]
async fn test_reverse_sync_writes_log_that_sync_logs_returns() {
    let local = FakeStoreServer::start().await;
    let remote = FakeStoreServer::start().await;
    let deployment = Deployment::new(&local.url(), &remote.url()).config_line("LOG_PREFIX=pull");
    let log = deployment.log_dir().join("pull-20251123_120000.log");
    let body = format!(
        "mkdir -p \"{}\"\necho \"pulled $2\" > \"{}\"\necho done\n",
        deployment.log_dir().display(),
        log.display()
    );
    let deployment = deployment.reverse(&body);
    write_log(&deployment.log_dir(), "pull", "20251120_120000", "older run");
    let server = deployment.server();

    let (is_error, result) = call_tool(
        &server,
        1,
        "sync_from_remote_collection",
        json!({"collection_name": "notes"}),
    )
    .await;
    assert!(!is_error);
    assert_eq!(result["success"], true);
    assert_eq!(result["direction"], "reverse");
    assert_eq!(result["stdout"], "done\n");

    let (_, logs) = call_tool(&server, 2, "sync_logs", json!({"count": 10})).await;
    let logs = logs["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["timestamp"], "20251123_120000");
    assert_eq!(logs[0]["content"], "pulled notes\n");
    assert_eq!(logs[1]["content"], "older run");
}

#[tokio::test]
async fn test_missing_procedure_is_launch_failure() {
    let local = FakeStoreServer::start().await;
    let remote = FakeStoreServer::start().await;
    let deployment = Deployment::new(&local.url(), &remote.url());
    let mut settings = deployment.settings();
    settings.forward_script = deployment.path().join("not-installed.sh");
    let server = ReplicaMcpServer::new(Dispatcher::from_settings(&settings).unwrap());

    let (is_error, payload) = call_tool(&server, 1, "sync_dry_run", json!({})).await;

    assert!(is_error);
    assert_eq!(payload["kind"], "launch_failure");
    assert!(payload["error"].as_str().unwrap().contains("not-installed.sh"));
    assert!(payload["hint"].is_string());
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_timeout_kills_procedure() {
    let local = FakeStoreServer::start().await;
    let remote = FakeStoreServer::start().await;
    let deployment = Deployment::new(&local.url(), &remote.url())
        .config_line("SYNC_TIMEOUT_SECS=1")
        .forward("echo $$ > \"$(dirname \"$0\")/pid\"\nexec sleep 30\n");
    let server = deployment.server();

    let started = std::time::Instant::now();
    let (is_error, payload) = call_tool(&server, 1, "sync_all", json!({"confirm": true})).await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(is_error);
    assert_eq!(payload["kind"], "timeout_exceeded");
    assert_eq!(payload["error"], "Sync timed out after 1 seconds");

    let pid = fs::read_to_string(deployment.path().join("pid")).unwrap();
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid.trim()));
    let running = stat
        .ok()
        .and_then(|s| s.rsplit_once(") ").and_then(|(_, rest)| rest.chars().next()))
        .is_some_and(|state| state != 'Z' && state != 'X');
    assert!(!running, "procedure still running after timeout");
}

#[tokio::test]
async fn test_unconfirmed_full_sync_never_runs() {
    let local = FakeStoreServer::start().await;
    let remote = FakeStoreServer::start().await;
    let deployment = Deployment::new(&local.url(), &remote.url())
        .forward("touch \"$(dirname \"$0\")/forward-ran\"\n")
        .reverse("touch \"$(dirname \"$0\")/reverse-ran\"\n");
    let server = deployment.server();

    for (id, tool) in [(1, "sync_all"), (2, "sync_from_remote_all")] {
        let (is_error, payload) = call_tool(&server, id, tool, json!({})).await;
        assert!(is_error);
        assert_eq!(payload["kind"], "confirmation_required");
    }

    assert!(!deployment.path().join("forward-ran").exists());
    assert!(!deployment.path().join("reverse-ran").exists());
}
