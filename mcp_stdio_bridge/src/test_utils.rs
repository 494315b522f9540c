//! In-memory MCP server used by unit tests.
//!
//! The fake server sits on the far side of two `tokio::io::duplex` pipes, records
//! every line the bridge writes and answers through a scripted responder.

use crate::envelope::Envelope;
use crate::supervisor::{Supervisor, SupervisorConfig};
use bytes::Bytes;
use serde_json::{Value, json};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

const PIPE_CAPACITY: usize = 64 * 1024;

pub fn envelope(line: &str) -> Envelope {
    Envelope::from_bytes(Bytes::copy_from_slice(line.as_bytes()))
}

type Responder = Box<dyn Fn(&Value) -> Vec<String> + Send + 'static>;

pub struct FakeServer {
    received: Arc<Mutex<String>>,
    pipes: Mutex<Option<(DuplexStream, BufReader<DuplexStream>)>>,
}

impl FakeServer {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Value) -> Vec<String> + Send + 'static,
    {
        Self::with_delays(responder, Vec::new())
    }

    /// Like [`FakeServer::new`], but waits before answering the given ids.
    pub fn with_delays<F>(responder: F, delays: Vec<(Value, Duration)>) -> Self
    where
        F: Fn(&Value) -> Vec<String> + Send + 'static,
    {
        Self::start(Some(Box::new(responder)), delays)
    }

    /// Answers every request with `{"jsonrpc":"2.0","id":<id>,"result":{"tools":[]}}`.
    pub fn echo() -> Self {
        Self::new(|message| match message.get("id") {
            Some(id) if !id.is_null() => {
                vec![json!({"jsonrpc":"2.0","id":id,"result":{"tools":[]}}).to_string()]
            }
            _ => Vec::new(),
        })
    }

    /// Reads stdin but has already closed stdout.
    pub fn closed() -> Self {
        Self::start(None, Vec::new())
    }

    fn start(responder: Option<Responder>, delays: Vec<(Value, Duration)>) -> Self {
        let (bridge_stdin, server_stdin) = duplex(PIPE_CAPACITY);
        let (mut server_stdout, bridge_stdout) = duplex(PIPE_CAPACITY);
        let received = Arc::new(Mutex::new(String::new()));

        let log = received.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_stdin).lines();
            let responder = match responder {
                Some(responder) => responder,
                None => {
                    drop(server_stdout);
                    while let Ok(Some(line)) = lines.next_line().await {
                        log.lock().unwrap().push_str(&format!("{line}\n"));
                    }
                    return;
                }
            };

            while let Ok(Some(line)) = lines.next_line().await {
                log.lock().unwrap().push_str(&format!("{line}\n"));
                let message: Value = serde_json::from_str(&line).unwrap_or(Value::Null);

                if let Some((_, delay)) = delays
                    .iter()
                    .find(|(id, _)| message.get("id") == Some(id))
                {
                    tokio::time::sleep(*delay).await;
                }

                for reply in responder(&message) {
                    if server_stdout.write_all(reply.as_bytes()).await.is_err()
                        || server_stdout.write_all(b"\n").await.is_err()
                    {
                        return;
                    }
                }
                let _ = server_stdout.flush().await;
            }
        });

        Self {
            received,
            pipes: Mutex::new(Some((bridge_stdin, BufReader::new(bridge_stdout)))),
        }
    }

    /// Build a supervisor wired to this server. Can be called once.
    pub fn supervisor(&self, config: SupervisorConfig) -> Supervisor {
        let (stdin, stdout) = self
            .pipes
            .lock()
            .unwrap()
            .take()
            .expect("supervisor already attached");
        Supervisor::from_pipes(stdin, stdout, config)
    }

    /// Everything written to the server's stdin so far.
    pub fn received_raw(&self) -> String {
        self.received.lock().unwrap().clone()
    }

    /// Wait (briefly) until at least `count` lines have arrived, then return them all.
    pub async fn wait_for_lines(&self, count: usize) -> String {
        for _ in 0..200 {
            let raw = self.received_raw();
            if raw.lines().count() >= count {
                return raw;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.received_raw()
    }

    pub fn received(&self) -> Vec<Value> {
        self.received_raw()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}
