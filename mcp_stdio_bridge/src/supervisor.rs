//! Subprocess supervision and the serialized stdio channel.
//!
//! A [`Supervisor`] owns exactly one MCP server subprocess. All traffic to it
//! goes through a bounded queue drained by a single worker task, which is the
//! only code that ever touches the subprocess stdin and stdout:
//!
//! ```text
//! HTTP handler ──submit──▶ [ queue (bounded) ] ──▶ worker ──▶ stdin
//!      ▲                                             │
//!      └──────────── oneshot completion ◀── correlate ◀── stdout
//! ```
//!
//! Stdio MCP servers handle one line at a time in arrival order, so only one
//! message is ever in flight. After writing a request the worker reads stdout
//! until it finds a line carrying an `id`; id-less lines are server
//! notifications and are always skipped. With strict id matching enabled the
//! `id` is compared against the one that was sent (after the request
//! transform), and a mismatch is logged but still delivered so a caller is
//! never left waiting forever.
//!
//! Stderr is drained by its own task into the log so a chatty server can never
//! stall on a full pipe. A third task watches for the process to exit; once it
//! has, every further submission fails with [`BridgeError::SubprocessExited`].

use crate::echo::{Direction, TrafficEcho};
use crate::envelope::{Envelope, ids_match, try_message_id};
use crate::error::{BridgeError, Result};
use crate::transform::SharedTransform;
use bytes::Bytes;
use serde_json::Value;
use std::{fmt, future::Future, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, Command},
    sync::{mpsc, oneshot, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Default number of calls that may wait for the worker before submitters block.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Settings for spawning and driving one MCP server subprocess.
#[derive(Clone)]
pub struct SupervisorConfig {
    /// Label used in logs and traffic echo.
    pub server_name: String,
    /// Executable to run, already resolved against any environment override.
    pub command: String,
    pub args: Vec<String>,
    /// Compare the response `id` with the request `id` instead of accepting
    /// the first line that has one.
    pub strict_id_matching: bool,
    pub queue_capacity: usize,
    pub request_transform: Option<SharedTransform>,
    pub response_transform: Option<SharedTransform>,
    /// Echo all pipe traffic to stderr in color.
    pub enable_colored_output: bool,
}

impl SupervisorConfig {
    pub fn new(server_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            command: command.into(),
            args: Vec::new(),
            strict_id_matching: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_transform: None,
            response_transform: None,
            enable_colored_output: false,
        }
    }
}

impl fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("server_name", &self.server_name)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("strict_id_matching", &self.strict_id_matching)
            .field("queue_capacity", &self.queue_capacity)
            .field("request_transform", &self.request_transform.is_some())
            .field("response_transform", &self.response_transform.is_some())
            .field("enable_colored_output", &self.enable_colored_output)
            .finish()
    }
}

/// Lifecycle of the supervised subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubprocessState {
    Running,
    /// The process is gone. Carries the exit code, `None` when killed by a signal.
    Exited(Option<i32>),
}

impl SubprocessState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for SubprocessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Exited(Some(code)) => write!(f, "exited with status {}", code),
            Self::Exited(None) => write!(f, "terminated by signal"),
        }
    }
}

/// Outcome of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The correlated response line, after the response transform.
    Response(Bytes),
    /// A notification was written to the subprocess.
    Accepted,
}

/// One unit of work for the worker. The completion sender is used at most
/// once; dropping it unsent tells the caller the call failed.
struct PendingCall {
    envelope: Envelope,
    expects_response: bool,
    completion: oneshot::Sender<Reply>,
}

/// Handle returned by [`Supervisor::submit`] for awaiting a queued call.
#[derive(Debug)]
pub struct PendingReply {
    completion: oneshot::Receiver<Reply>,
}

impl PendingReply {
    /// Wait until the worker has finished the call.
    pub async fn wait(self) -> Result<Reply> {
        self.completion.await.map_err(|_| {
            BridgeError::Communication("MCP server did not produce a response".to_string())
        })
    }
}

/// Owner of the MCP server subprocess and of the single worker serializing
/// access to its pipes.
pub struct Supervisor {
    server_name: String,
    queue: mpsc::Sender<PendingCall>,
    state: watch::Receiver<SubprocessState>,
    pid: Option<u32>,
    shutdown: CancellationToken,
}

impl Supervisor {
    /// Launch the MCP server and start the worker, stderr drain and exit monitor.
    ///
    /// The child inherits the bridge's environment. It is killed when the
    /// supervisor shuts down or is dropped.
    pub fn spawn(config: SupervisorConfig) -> Result<Self> {
        let span = info_span!("mcp_server", server = %config.server_name);
        let _entered = span.enter();

        info!("Starting MCP server at: {}", config.command);

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::ServerProcess(format!(
                    "Failed to start MCP server {}: {}",
                    config.command, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::ServerProcess("Failed to get stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::ServerProcess("Failed to get stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::ServerProcess("Failed to get stderr pipe".to_string()))?;

        let pid = child.id();
        info!(pid = ?pid, "Started MCP server");

        let echo = config
            .enable_colored_output
            .then(|| TrafficEcho::new(&config.server_name));
        tokio::spawn(drain_stderr(stderr, echo).instrument(span.clone()));

        let (state_tx, state_rx) = watch::channel(SubprocessState::Running);
        let shutdown = CancellationToken::new();
        tokio::spawn(monitor_exit(child, state_tx, shutdown.clone()).instrument(span.clone()));

        Ok(Self::start(
            stdin,
            BufReader::new(stdout),
            config,
            state_rx,
            pid,
            shutdown,
            span.clone(),
        ))
    }

    /// Drive an already-connected pair of pipes instead of a spawned process.
    ///
    /// The state stays [`SubprocessState::Running`] for the lifetime of the
    /// supervisor since there is no process to watch.
    pub fn from_pipes<W, R>(stdin: W, stdout: R, config: SupervisorConfig) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (_state_tx, state_rx) = watch::channel(SubprocessState::Running);
        let span = info_span!("mcp_server", server = %config.server_name);
        Self::start(
            stdin,
            stdout,
            config,
            state_rx,
            None,
            CancellationToken::new(),
            span,
        )
    }

    fn start<W, R>(
        stdin: W,
        stdout: R,
        config: SupervisorConfig,
        state: watch::Receiver<SubprocessState>,
        pid: Option<u32>,
        shutdown: CancellationToken,
        span: tracing::Span,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));

        let worker = Worker {
            stdin,
            stdout,
            line: Vec::new(),
            strict_id_matching: config.strict_id_matching,
            request_transform: config.request_transform,
            response_transform: config.response_transform,
            echo: config
                .enable_colored_output
                .then(|| TrafficEcho::new(&config.server_name)),
        };
        tokio::spawn(worker.run(queue_rx, shutdown.clone()).instrument(span));

        Self {
            server_name: config.server_name,
            queue: queue_tx,
            state,
            pid,
            shutdown,
        }
    }

    /// Enqueue a message for the subprocess.
    ///
    /// Waits while the queue is full. With `expects_response` the returned
    /// handle yields [`Reply::Response`]; otherwise it yields
    /// [`Reply::Accepted`] once the message has been written.
    pub async fn submit(&self, envelope: Envelope, expects_response: bool) -> Result<PendingReply> {
        self.ensure_running()?;

        let (completion, receiver) = oneshot::channel();
        self.queue
            .send(PendingCall {
                envelope,
                expects_response,
                completion,
            })
            .await
            .map_err(|_| BridgeError::Communication("Request queue closed".to_string()))?;

        Ok(PendingReply {
            completion: receiver,
        })
    }

    /// Submit an envelope and wait for its completion.
    ///
    /// Requests and notifications are told apart by the envelope's `id`. The
    /// optional timeout bounds both the queue wait and the completion wait. A
    /// caller that times out while still queued is never written to the
    /// subprocess. Once its message is on the wire the worker still finishes
    /// the read in progress so the pipe stays in step.
    pub async fn call(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<Reply> {
        let expects_response = envelope.is_request();
        let deadline = timeout.map(|limit| (Instant::now() + limit, limit));

        let pending = with_deadline(deadline, self.submit(envelope, expects_response)).await?;
        with_deadline(deadline, pending.wait()).await
    }

    /// Fail fast with [`BridgeError::SubprocessExited`] once the process is gone.
    pub fn ensure_running(&self) -> Result<()> {
        match self.state() {
            SubprocessState::Running => Ok(()),
            exited => Err(BridgeError::SubprocessExited(exited.to_string())),
        }
    }

    pub fn state(&self) -> SubprocessState {
        *self.state.borrow()
    }

    /// Resolves once the subprocess has exited.
    pub async fn wait_for_exit(&self) -> SubprocessState {
        let mut state = self.state.clone();
        match state.wait_for(|s| !s.is_running()).await {
            Ok(exited) => *exited,
            Err(_) => self.state(),
        }
    }

    /// Number of calls waiting in the queue, not counting the one in flight.
    pub fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Stop the worker and kill the subprocess.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("server_name", &self.server_name)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}

async fn with_deadline<T, F>(deadline: Option<(Instant, Duration)>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some((at, limit)) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| BridgeError::Timeout(limit))?,
        None => fut.await,
    }
}

/// Exclusive owner of the subprocess stdin and stdout.
struct Worker<W, R> {
    stdin: W,
    stdout: R,
    line: Vec<u8>,
    strict_id_matching: bool,
    request_transform: Option<SharedTransform>,
    response_transform: Option<SharedTransform>,
    echo: Option<TrafficEcho>,
}

impl<W, R> Worker<W, R>
where
    W: AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
{
    async fn run(mut self, mut queue: mpsc::Receiver<PendingCall>, shutdown: CancellationToken) {
        loop {
            let call = tokio::select! {
                _ = shutdown.cancelled() => break,
                call = queue.recv() => match call {
                    Some(call) => call,
                    None => break,
                },
            };
            self.process(call).await;
        }
        debug!("Worker stopped");
    }

    async fn process(&mut self, call: PendingCall) {
        let PendingCall {
            envelope,
            expects_response,
            completion,
        } = call;

        if completion.is_closed() {
            debug!(id = ?envelope.id(), "Caller gave up before dispatch, dropping message");
            return;
        }

        let mut message = envelope.into_bytes();
        if let Some(transform) = &self.request_transform {
            message = transform.transform(message);
        }

        if let Err(e) = self.write_line(&message).await {
            error!("Error writing to stdin: {}", e);
            return;
        }

        if !expects_response {
            let _ = completion.send(Reply::Accepted);
            return;
        }

        // Correlate against the id that actually went out.
        let sent_id = try_message_id(&message).ok().flatten();
        match self.read_response(sent_id.as_ref()).await {
            Ok(mut response) => {
                if let Some(transform) = &self.response_transform {
                    response = transform.transform(response);
                }
                if completion.send(Reply::Response(response)).is_err() {
                    debug!(id = ?sent_id, "Caller went away, discarding response");
                }
            }
            Err(e) => error!("Error reading response: {}", e),
        }
    }

    async fn write_line(&mut self, message: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(message);
        debug!("Sending: {}", text);
        if let Some(echo) = &self.echo {
            echo.line(Direction::Stdin, &text);
        }

        self.stdin.write_all(message).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await
    }

    async fn read_response(&mut self, sent_id: Option<&Value>) -> Result<Bytes> {
        loop {
            let line = self.read_line().await?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let text = String::from_utf8_lossy(&line);
            debug!("Received: {}", text);
            if let Some(echo) = &self.echo {
                echo.line(Direction::Stdout, &text);
            }

            let id = match try_message_id(&line) {
                Ok(Some(id)) => id,
                Ok(None) => {
                    debug!("Skipping notification while waiting for response");
                    continue;
                }
                Err(e) => {
                    warn!("Skipping non JSON-RPC line from MCP server ({}): {}", e, text);
                    continue;
                }
            };

            if !self.strict_id_matching {
                return Ok(line);
            }

            match sent_id {
                Some(expected) if ids_match(&id, expected) => return Ok(line),
                expected => {
                    warn!(
                        received = %id,
                        expected = ?expected,
                        "Received response with unexpected ID, returning it anyway"
                    );
                    return Ok(line);
                }
            }
        }
    }

    /// Next stdout line without its terminator.
    async fn read_line(&mut self) -> Result<Bytes> {
        self.line.clear();
        let read = self.stdout.read_until(b'\n', &mut self.line).await?;
        if read == 0 {
            return Err(BridgeError::Communication(
                "MCP server closed stdout".to_string(),
            ));
        }

        let mut end = self.line.len();
        while end > 0 && matches!(self.line[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        Ok(Bytes::copy_from_slice(&self.line[..end]))
    }
}

async fn drain_stderr(stderr: ChildStderr, echo: Option<TrafficEcho>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!("MCP server stderr closed");
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                match &echo {
                    Some(echo) => echo.line(Direction::Stderr, line),
                    None => info!(stream = "stderr", "{}", line),
                }
            }
            Err(e) => {
                warn!("Failed to read MCP server stderr: {}", e);
                break;
            }
        }
    }
}

async fn monitor_exit(
    mut child: Child,
    state: watch::Sender<SubprocessState>,
    shutdown: CancellationToken,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = shutdown.cancelled() => {
            info!("Stopping MCP server");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill MCP server: {}", e);
            }
            child.wait().await
        }
    };

    let exited = match status {
        Ok(status) => SubprocessState::Exited(status.code()),
        Err(e) => {
            error!("Failed to wait for MCP server: {}", e);
            SubprocessState::Exited(None)
        }
    };

    if shutdown.is_cancelled() {
        info!("MCP server {}", exited);
    } else {
        error!("MCP server {} unexpectedly, bridge is now unavailable", exited);
    }
    state.send_replace(exited);
}
