use anyhow::{Context, bail};
use axum::http::StatusCode;
use clap::{Parser, builder::BoolishValueParser};
use mcp_stdio_bridge::{
    BridgeConfig, ErrorMarker, ExtraRoute, Preset,
    config::{DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_SECS},
    logging::init_logging,
    start_bridge,
    supervisor::DEFAULT_QUEUE_CAPACITY,
};
use std::{
    io::IsTerminal,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

/// Expose a stdio MCP server over HTTP.
///
/// Each HTTP request body is one JSON-RPC message, forwarded to the MCP server
/// subprocess in arrival order. Every option can also be set through the
/// environment; command-line values win over the environment, and both win
/// over the preset.
#[derive(Parser, Debug)]
#[command(name = "mcp_stdio_bridge")]
#[command(version, about)]
struct Args {
    /// Known MCP server deployment to take defaults from.
    #[arg(long, env = "MCP_BRIDGE_PRESET", value_enum, default_value_t = Preset::Generic)]
    preset: Preset,

    /// Label for the MCP server in logs.
    #[arg(long, env = "MCP_SERVER_NAME")]
    server_name: Option<String>,

    /// Path or command name of the MCP server executable.
    #[arg(long, env = "MCP_SERVER_COMMAND")]
    command: Option<String>,

    /// Environment variable that, when set, overrides the command path.
    #[arg(long, env = "MCP_SERVER_COMMAND_ENV")]
    command_env_var: Option<String>,

    /// Argument for the MCP server (repeatable).
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Space-separated arguments for the MCP server, used when no
    /// --server-arg is given.
    #[arg(
        long = "server-args",
        env = "MCP_SERVER_ARGS",
        value_name = "ARGS",
        allow_hyphen_values = true
    )]
    server_args_line: Option<String>,

    /// Address to listen on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Send permissive CORS headers and answer OPTIONS preflights.
    #[arg(
        long,
        env = "MCP_ENABLE_CORS",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    cors: Option<bool>,

    /// Serve GET/POST /sse.
    #[arg(
        long,
        env = "MCP_ENABLE_SSE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    sse: Option<bool>,

    /// Only accept a response whose id matches the request id (mismatches are
    /// logged and still returned).
    #[arg(
        long,
        env = "MCP_STRICT_ID_MATCHING",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    strict_ids: Option<bool>,

    /// Regular expression marking a tool result as an error (repeatable).
    /// Replaces the preset's patterns.
    #[arg(long = "error-pattern")]
    error_patterns: Vec<String>,

    /// Answer PATH with 410 Gone and MESSAGE (repeatable), e.g. for endpoints
    /// that have moved.
    #[arg(
        long = "notice-route",
        value_name = "PATH=MESSAGE",
        value_parser = parse_notice_route
    )]
    notice_routes: Vec<NoticeRoute>,

    /// Seconds to wait for the MCP server per HTTP call; 0 waits forever.
    #[arg(long, env = "MCP_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout_secs: u64,

    /// Calls allowed to wait for the MCP server before new ones block.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Echo all MCP server traffic to stderr in color.
    #[arg(long)]
    colored_output: bool,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NoticeRoute {
    path: String,
    message: String,
}

fn parse_notice_route(value: &str) -> Result<NoticeRoute, String> {
    let (path, message) = value
        .split_once('=')
        .ok_or_else(|| format!("expected PATH=MESSAGE, got '{}'", value))?;
    if !path.starts_with('/') {
        return Err(format!("route path must start with '/': '{}'", path));
    }
    Ok(NoticeRoute {
        path: path.to_string(),
        message: message.to_string(),
    })
}

fn build_config(args: Args) -> anyhow::Result<BridgeConfig> {
    let mut config = BridgeConfig::from_preset(args.preset);

    if let Some(name) = args.server_name {
        config.server_name = name;
    }
    if let Some(command) = args.command {
        config.server_command = command;
    }
    if let Some(var) = args.command_env_var {
        config.command_env_var = Some(var).filter(|v| !v.is_empty());
    }

    if !args.server_args.is_empty() {
        config.server_args = args.server_args;
    } else if let Some(line) = args.server_args_line
        && !line.trim().is_empty()
    {
        config.server_args = line.split_whitespace().map(str::to_string).collect();
    }

    let host: IpAddr = args
        .host
        .parse()
        .with_context(|| format!("invalid listen host '{}'", args.host))?;
    config.bind_addr = SocketAddr::new(host, args.port);

    if let Some(cors) = args.cors {
        config.enable_cors = cors;
    }
    if let Some(sse) = args.sse {
        config.enable_sse = sse;
    }
    if let Some(strict) = args.strict_ids {
        config.strict_id_matching = strict;
    }

    if !args.error_patterns.is_empty() {
        let marker = ErrorMarker::new(&args.error_patterns).context("invalid --error-pattern")?;
        config.response_transform = Some(Arc::new(marker));
    }

    config.extra_routes = args
        .notice_routes
        .into_iter()
        .map(|route| ExtraRoute::notice(route.path, StatusCode::GONE, route.message))
        .collect();

    config.request_timeout =
        (args.request_timeout_secs > 0).then(|| Duration::from_secs(args.request_timeout_secs));
    if args.queue_capacity == 0 {
        bail!("--queue-capacity must be at least 1");
    }
    config.queue_capacity = args.queue_capacity;
    config.enable_colored_output = args.colored_output;

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(
        if args.debug { "debug" } else { "info" },
        std::io::stderr().is_terminal(),
    );

    let preset = args.preset;
    let config = build_config(args)?;

    tracing::info!(
        "Starting MCP stdio bridge ({} preset) on {}",
        preset,
        config.bind_addr
    );
    tracing::info!("Proxying to command: {}", config.resolve_command());

    start_bridge(config).await?;
    Ok(())
}
