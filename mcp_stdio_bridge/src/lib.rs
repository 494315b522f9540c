//! # MCP stdio bridge
//!
//! Exposes an MCP server that only speaks newline-delimited JSON-RPC over
//! stdin/stdout as an HTTP service.
//!
//! ## Architecture
//!
//! *   **Supervisor**: owns the one subprocess for the lifetime of the bridge.
//!     A single worker task writes queued messages to its stdin in arrival
//!     order and reads the matching response back from stdout.
//! *   **HTTP transport**: every request body is one JSON-RPC message. Requests
//!     (non-null `id`) get the subprocess response back verbatim, notifications
//!     get `202 Accepted`. An optional `/sse` route frames responses as
//!     Server-Sent Events for clients that expect them.
//! *   **Middleware**: request and response [`Transform`]s rewrite messages on
//!     their way through, e.g. [`ErrorMarker`] flags tool results that report
//!     Oracle errors as text.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mcp_stdio_bridge::{BridgeConfig, Preset, start_bridge};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig {
//!         bind_addr: "127.0.0.1:8080".parse()?,
//!         strict_id_matching: true,
//!         ..BridgeConfig::from_preset(Preset::OracleSqlcl)
//!     };
//!
//!     start_bridge(config).await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod echo;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod preset;
pub mod supervisor;
pub mod transform;

#[cfg(test)]
mod test_utils;

pub use bridge::{build_router, serve, start_bridge};
pub use config::{BridgeConfig, ExtraRoute};
pub use envelope::Envelope;
pub use error::{BridgeError, Result};
pub use preset::Preset;
pub use supervisor::{Reply, SubprocessState, Supervisor, SupervisorConfig};
pub use transform::{ErrorMarker, SharedTransform, Transform};
