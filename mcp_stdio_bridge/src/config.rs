//! Bridge configuration.

use crate::error::{BridgeError, Result};
use crate::preset::Preset;
use crate::supervisor::{DEFAULT_QUEUE_CAPACITY, SupervisorConfig};
use crate::transform::SharedTransform;
use axum::{http::StatusCode, routing::MethodRouter, routing::any};
use std::{collections::HashSet, fmt, net::SocketAddr, time::Duration};

/// Default listen port, matching the container contract.
pub const DEFAULT_PORT: u16 = 8080;

/// Default per-call deadline for bridge → subprocess round trips.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// An additional HTTP route registered ahead of the catch-all handler.
#[derive(Clone)]
pub struct ExtraRoute {
    pub path: String,
    pub handler: MethodRouter,
}

impl ExtraRoute {
    pub fn new(path: impl Into<String>, handler: MethodRouter) -> Self {
        Self {
            path: path.into(),
            handler,
        }
    }

    /// A route answering every method with a fixed status and plain-text message,
    /// typically a deprecation notice for an endpoint that moved.
    pub fn notice(path: impl Into<String>, status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            path,
            any(move || {
                let message = message.clone();
                async move { (status, message) }
            }),
        )
    }
}

impl fmt::Debug for ExtraRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtraRoute")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Configuration for the HTTP bridge server.
///
/// Captured once at startup and never mutated afterwards.
///
/// # Example
///
/// ```rust
/// use mcp_stdio_bridge::BridgeConfig;
///
/// let config = BridgeConfig {
///     server_name: "weather".into(),
///     server_command: "/usr/local/bin/weather-mcp".into(),
///     server_args: vec!["--stdio".into()],
///     enable_cors: true,
///     ..Default::default()
/// };
/// assert_eq!(config.bind_addr.port(), 8080);
/// ```
#[derive(Clone)]
pub struct BridgeConfig {
    /// Label used in every log line about the wrapped server.
    pub server_name: String,

    /// Default path or command name of the MCP server executable.
    pub server_command: String,

    /// Name of an environment variable that, when set and non-empty, replaces
    /// `server_command`.
    pub command_env_var: Option<String>,

    /// Command-line arguments to pass to the MCP server.
    pub server_args: Vec<String>,

    /// Address to bind the HTTP server to. Use port 0 for a random port.
    pub bind_addr: SocketAddr,

    /// Add permissive CORS headers and answer `OPTIONS` preflights.
    pub enable_cors: bool,

    /// Register `GET|POST /sse`.
    pub enable_sse: bool,

    /// Require the response `id` to match the request `id` (mismatches are
    /// logged and still returned).
    pub strict_id_matching: bool,

    /// Deadline for one HTTP call, covering queueing and the subprocess round
    /// trip. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,

    /// Capacity of the request queue in front of the subprocess.
    pub queue_capacity: usize,

    /// Echo all subprocess traffic to stderr in color (debugging aid).
    pub enable_colored_output: bool,

    pub request_transform: Option<SharedTransform>,
    pub response_transform: Option<SharedTransform>,

    /// Routes taking precedence over the catch-all and built-in handlers.
    pub extra_routes: Vec<ExtraRoute>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_name: "mcp".to_string(),
            server_command: String::new(),
            command_env_var: None,
            server_args: vec![],
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            enable_cors: false,
            enable_sse: false,
            strict_id_matching: false,
            request_timeout: Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enable_colored_output: false,
            request_transform: None,
            response_transform: None,
            extra_routes: vec![],
        }
    }
}

impl BridgeConfig {
    /// Baseline configuration for one of the known MCP server deployments.
    pub fn from_preset(preset: Preset) -> Self {
        preset.apply(Self::default())
    }

    /// The executable to launch, honoring `command_env_var` from the process environment.
    pub fn resolve_command(&self) -> String {
        self.resolve_command_with(|name| std::env::var(name).ok())
    }

    /// Like [`BridgeConfig::resolve_command`], reading variables through `lookup`.
    pub fn resolve_command_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        self.command_env_var
            .as_deref()
            .and_then(lookup)
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| self.server_command.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolve_command().trim().is_empty() {
            return Err(BridgeError::Config(
                "no MCP server command configured (use --command or a preset)".to_string(),
            ));
        }
        for route in &self.extra_routes {
            check_route_path(&route.path).map_err(|reason| {
                BridgeError::Config(format!("invalid extra route {}: {}", route.path, reason))
            })?;
        }
        let mut seen = HashSet::new();
        if let Some(route) = self.extra_routes.iter().find(|r| !seen.insert(&r.path)) {
            return Err(BridgeError::Config(format!(
                "extra route registered twice: {}",
                route.path
            )));
        }
        Ok(())
    }

    /// Settings handed to the subprocess supervisor.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            server_name: self.server_name.clone(),
            command: self.resolve_command(),
            args: self.server_args.clone(),
            strict_id_matching: self.strict_id_matching,
            queue_capacity: self.queue_capacity,
            request_transform: self.request_transform.clone(),
            response_transform: self.response_transform.clone(),
            enable_colored_output: self.enable_colored_output,
        }
    }
}

/// Rejects paths that the router would refuse at registration.
fn check_route_path(path: &str) -> std::result::Result<(), String> {
    if !path.starts_with('/') {
        return Err("path must start with '/'".to_string());
    }

    let segments: Vec<&str> = path.split('/').skip(1).collect();
    for (index, segment) in segments.iter().enumerate() {
        if segment.starts_with(':') || segment.starts_with('*') {
            return Err(format!(
                "segment '{}' uses the old capture syntax, write '{{name}}' instead",
                segment
            ));
        }
        if segment.starts_with("{*") && index + 1 != segments.len() {
            return Err("a catch-all capture must be the last segment".to_string());
        }

        let mut chars = segment.chars().peekable();
        let mut capture: Option<usize> = None;
        while let Some(c) = chars.next() {
            match (c, capture) {
                ('{', None) if chars.peek() == Some(&'{') => {
                    chars.next();
                }
                ('}', None) if chars.peek() == Some(&'}') => {
                    chars.next();
                }
                ('{', None) => capture = Some(0),
                ('}', Some(0)) => return Err("empty capture '{}'".to_string()),
                ('}', Some(_)) => capture = None,
                ('{' | '}', _) => return Err(format!("unbalanced braces in '{}'", segment)),
                (_, Some(len)) => capture = Some(len + 1),
                (_, None) => {}
            }
        }
        if capture.is_some() {
            return Err(format!("unbalanced braces in '{}'", segment));
        }
    }
    Ok(())
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("server_name", &self.server_name)
            .field("server_command", &self.server_command)
            .field("command_env_var", &self.command_env_var)
            .field("server_args", &self.server_args)
            .field("bind_addr", &self.bind_addr)
            .field("enable_cors", &self.enable_cors)
            .field("enable_sse", &self.enable_sse)
            .field("strict_id_matching", &self.strict_id_matching)
            .field("request_timeout", &self.request_timeout)
            .field("queue_capacity", &self.queue_capacity)
            .field("enable_colored_output", &self.enable_colored_output)
            .field("request_transform", &self.request_transform.is_some())
            .field("response_transform", &self.response_transform.is_some())
            .field("extra_routes", &self.extra_routes)
            .finish()
    }
}
