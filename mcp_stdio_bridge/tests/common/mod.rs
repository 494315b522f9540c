//! Shared helpers for the bridge integration tests.
//!
//! Each test gets its own bridge on a random port, wrapping a small Python MCP
//! server written into a temp directory. The mock logs every line it receives
//! to a file so tests can check exactly what reached the subprocess.

#![allow(dead_code)]

use mcp_stdio_bridge::{BridgeConfig, serve};
use std::{fs, path::PathBuf, time::Duration};
use tempfile::TempDir;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

const SERVER_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Mock MCP server.
///
/// Usage: `mock_mcp_server.py <mode> <received-log>`
///
/// * `echo`: answers each request with `{"jsonrpc":"2.0","id":<id>,"result":{"tools":[]}}`.
/// * `chatty`: like `echo`, but emits a progress notification and a log line
///   on stdout before every response.
///
/// In every mode `tools/call` answers with the `params.text` it was given as
/// text content, and the `exit` method terminates the process with status 7
/// without answering.
const MOCK_MCP_SERVER: &str = r#"import json
import sys

mode = sys.argv[1]
log_path = sys.argv[2]

sys.stderr.write("mock MCP server starting\n")
sys.stderr.flush()


def send(message):
    sys.stdout.write(json.dumps(message, separators=(",", ":")) + "\n")
    sys.stdout.flush()


for line in sys.stdin:
    with open(log_path, "a") as log:
        log.write(line)

    line = line.strip()
    if not line:
        continue
    message = json.loads(line)
    method = message.get("method")

    if method == "exit":
        sys.exit(7)

    request_id = message.get("id")
    if request_id is None:
        continue

    if mode == "chatty":
        send({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 1}})
        sys.stdout.write("not json at all\n")
        sys.stdout.flush()

    if method == "tools/call":
        text = message.get("params", {}).get("text", "")
        result = {"content": [{"type": "text", "text": text}]}
    else:
        result = {"tools": []}
    send({"jsonrpc": "2.0", "id": request_id, "result": result})
"#;

/// A running bridge in front of the mock MCP server.
///
/// Dropping it shuts the bridge down, which also stops the subprocess.
pub struct TestBridge {
    pub base_url: String,
    log_path: PathBuf,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<mcp_stdio_bridge::Result<()>>>,
    _temp_dir: TempDir,
}

impl TestBridge {
    /// Start a bridge with default settings around the mock in `mode`.
    pub async fn start(mode: &str) -> Self {
        Self::start_with(mode, |_| {}).await
    }

    /// Start a bridge, letting the test adjust the configuration first.
    pub async fn start_with(mode: &str, configure: impl FnOnce(&mut BridgeConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let script_path = temp_dir.path().join("mock_mcp_server.py");
        fs::write(&script_path, MOCK_MCP_SERVER).expect("Failed to write mock server script");
        let log_path = temp_dir.path().join("received.log");
        fs::write(&log_path, "").expect("Failed to create received log");

        let mut config = BridgeConfig {
            server_name: "mock".to_string(),
            server_command: "python3".to_string(),
            server_args: vec![
                script_path.to_string_lossy().to_string(),
                mode.to_string(),
                log_path.to_string_lossy().to_string(),
            ],
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            request_timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        configure(&mut config);

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, config, async {
            shutdown_rx.await.ok();
        }));

        let bridge = Self {
            base_url: format!("http://127.0.0.1:{}", port),
            log_path,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            _temp_dir: temp_dir,
        };
        bridge.wait_for_ready().await;
        bridge
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Polls `/health` until the bridge answers at all.
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        while start.elapsed() < SERVER_READY_TIMEOUT {
            if client.get(self.url("/health")).send().await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Bridge did not become ready within {:?}", SERVER_READY_TIMEOUT);
    }

    /// Lines the mock MCP server has read from stdin, terminators included.
    pub fn received_raw(&self) -> String {
        fs::read_to_string(&self.log_path).unwrap_or_default()
    }

    /// Wait until the mock has logged at least `count` lines.
    pub async fn wait_for_received(&self, count: usize) -> String {
        let start = std::time::Instant::now();
        loop {
            let raw = self.received_raw();
            if raw.lines().count() >= count || start.elapsed() > SERVER_READY_TIMEOUT {
                return raw;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll `/health` until it reports `status`.
    pub async fn wait_for_health(&self, status: reqwest::StatusCode) -> bool {
        let client = reqwest::Client::new();
        let start = std::time::Instant::now();
        while start.elapsed() < SERVER_READY_TIMEOUT {
            if let Ok(response) = client.get(self.url("/health")).send().await
                && response.status() == status
            {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    /// Shut down gracefully and return what the bridge returned.
    pub async fn stop(mut self) -> mcp_stdio_bridge::Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let handle = self.handle.take().expect("bridge already stopped");
        handle.await.expect("bridge task panicked")
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
