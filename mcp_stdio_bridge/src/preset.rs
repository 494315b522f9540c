//! Named defaults for the MCP servers this bridge is commonly deployed with.

use crate::config::BridgeConfig;
use crate::transform::ErrorMarker;
use clap::ValueEnum;
use std::{fmt, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Preset {
    /// Any stdio MCP server; the command must be supplied.
    #[default]
    Generic,
    /// Oracle SQLcl in MCP mode, with ORA- error marking.
    OracleSqlcl,
    /// GitHub's MCP server, with CORS and the SSE route.
    Github,
}

impl Preset {
    /// Overlay this preset's defaults onto `config`.
    pub fn apply(self, mut config: BridgeConfig) -> BridgeConfig {
        match self {
            Preset::Generic => {}
            Preset::OracleSqlcl => {
                config.server_name = "sqlcl".to_string();
                config.server_command = "/opt/oracle/sqlcl/bin/sql".to_string();
                config.command_env_var = Some("SQL_PATH".to_string());
                config.server_args = vec!["-mcp".to_string()];
                config.response_transform = Some(Arc::new(ErrorMarker::oracle()));
            }
            Preset::Github => {
                config.server_name = "github-mcp".to_string();
                config.server_command = "/server/github-mcp-server".to_string();
                config.command_env_var = Some("GITHUB_MCP_PATH".to_string());
                config.server_args = vec!["stdio".to_string()];
                config.enable_cors = true;
                config.enable_sse = true;
            }
        }
        config
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => write!(f, "{:?}", self),
        }
    }
}
