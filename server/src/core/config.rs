//! Application configuration
//!
//! Precedence: CLI flags (which clap already backs with environment
//! variables) over built-in defaults.

use super::cli::CliConfig;
use super::constants::{DEFAULT_HOST, DEFAULT_PORT};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Root-span allowance per organization; `None` disables metering.
    pub trace_quota: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn load(cli: &CliConfig) -> Self {
        Self {
            server: ServerConfig {
                host: cli.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: cli.port.unwrap_or(DEFAULT_PORT),
            },
            trace_quota: cli.trace_quota,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_cli_is_empty() {
        let config = AppConfig::load(&CliConfig::default());
        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(config.trace_quota.is_none());
    }

    #[test]
    fn cli_overrides_defaults() {
        let config = AppConfig::load(&CliConfig {
            host: Some("0.0.0.0".to_string()),
            port: Some(9000),
            trace_quota: Some(1_000),
        });
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.trace_quota, Some(1_000));
    }
}
