//! Common command-line arguments for the IED services
//!
//! Services flatten [`ServiceArgs`] into their own clap parser.

#[cfg(feature = "cli")]
use clap::Args;
use std::path::PathBuf;

/// Common service startup arguments
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[cfg_attr(
        feature = "cli",
        arg(short = 'l', long, default_value = "info", env = "RUST_LOG")
    )]
    pub log_level: String,

    /// Configuration file (yaml, toml or json)
    #[cfg_attr(feature = "cli", arg(short = 'c', long, env = "IED_CONFIG"))]
    pub config: Option<PathBuf>,

    /// Directory for log files
    #[cfg_attr(feature = "cli", arg(long, env = "IED_LOG_DIR"))]
    pub log_dir: Option<PathBuf>,

    /// Disable colored output (useful for log files)
    #[cfg_attr(feature = "cli", arg(long))]
    pub no_color: bool,

    /// Only validate configuration and data model without starting service
    #[cfg_attr(feature = "cli", arg(long))]
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            config: None,
            log_dir: None,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    ///
    /// Filter specs such as `info,iedsrv=debug` fall back to INFO here; they
    /// are still honoured through `RUST_LOG`.
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = ServiceArgs::default();
        assert_eq!(args.log_level, "info");
        assert!(args.config.is_none());
        assert!(!args.validate);
    }

    #[test]
    fn test_parse_log_level() {
        let args = ServiceArgs {
            log_level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::DEBUG);

        let args = ServiceArgs {
            log_level: "WARN".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::WARN);

        let args = ServiceArgs {
            log_level: "info,iedsrv=debug".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::INFO);
    }
}
