//! Server configuration
//!
//! Loaded in layers: compiled-in defaults, an optional yaml/toml/json file,
//! then `IEDSRV_`-prefixed environment variables (`__` separates nested
//! keys, e.g. `IEDSRV_WRITE_POLICY__DC=allow`). Command-line overrides are
//! applied by the binary on the extracted value.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use errors::{IedError, IedResult};
use iec61850_model::FunctionalConstraint;
use serde::{Deserialize, Serialize};

/// Default MMS port
pub const DEFAULT_PORT: u16 = 102;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "IEDSRV_";

/// Access decision for one functional constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicy {
    Deny,
    Allow,
}

impl AccessPolicy {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Data server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub host: String,
    /// TCP port; 0 picks an ephemeral port
    pub port: u16,
    /// Close sessions without inbound frames for this long (0 disables)
    pub idle_timeout_secs: u64,
    /// Connections beyond this count are refused at accept time
    pub max_sessions: usize,
    /// Pending reports per session above which a warning is logged
    pub report_queue_warn: usize,
    /// Period of the application update loop in milliseconds
    pub update_interval_ms: u64,
    /// Read policy overrides; FCs not listed are allowed
    pub read_policy: BTreeMap<FunctionalConstraint, AccessPolicy>,
    /// Write policy overrides; FCs not listed are denied
    pub write_policy: BTreeMap<FunctionalConstraint, AccessPolicy>,
    /// Log filter applied once the configuration is loaded (`info,iedsrv=debug`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            idle_timeout_secs: 300,
            max_sessions: 10,
            report_queue_warn: 1024,
            update_interval_ms: 100,
            read_policy: BTreeMap::new(),
            write_policy: BTreeMap::new(),
            log_level: None,
        }
    }
}

impl ServerConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults, then `file` if given, then `IEDSRV_*` environment variables
    pub fn load(file: Option<&Path>) -> IedResult<Self> {
        let config: Self = common::load_layered(&Self::default(), file, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the bind host
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the idle timeout; `None` disables it
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout_secs = timeout.map_or(0, |d| d.as_secs().max(1));
        self
    }

    /// Set the maximum number of concurrent sessions
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the read policy of one FC
    pub fn read_policy(mut self, fc: FunctionalConstraint, policy: AccessPolicy) -> Self {
        self.read_policy.insert(fc, policy);
        self
    }

    /// Set the write policy of one FC
    pub fn write_policy(mut self, fc: FunctionalConstraint, policy: AccessPolicy) -> Self {
        self.write_policy.insert(fc, policy);
        self
    }

    pub fn idle_timeout_duration(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn bind_addr(&self, port: u16) -> String {
        format!("{}:{}", self.host, port)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> IedResult<()> {
        if self.host.trim().is_empty() {
            return Err(IedError::InvalidConfig {
                field: "host".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_sessions == 0 {
            return Err(IedError::InvalidConfig {
                field: "max_sessions".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.update_interval_ms == 0 {
            return Err(IedError::InvalidConfig {
                field: "update_interval_ms".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.report_queue_warn == 0 {
            return Err(IedError::InvalidConfig {
                field: "report_queue_warn".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
