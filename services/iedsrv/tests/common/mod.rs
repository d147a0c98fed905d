//! Shared fixtures for the iedsrv integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::time::Duration;

use iec61850_model::FunctionalConstraint;
use iedsrv::{battery, AccessPolicy, IedServer, ServerConfig};

/// Loopback configuration with an ephemeral port
pub fn test_config() -> ServerConfig {
    ServerConfig::new()
        .host("127.0.0.1")
        .port(0)
        .write_policy(FunctionalConstraint::Description, AccessPolicy::Allow)
}

/// Battery server with writes allowed on DC only
pub fn battery_server() -> IedServer {
    battery_server_with(test_config())
}

pub fn battery_server_with(config: ServerConfig) -> IedServer {
    IedServer::new(battery::build_model().unwrap(), config).unwrap()
}

/// Poll `condition` until it holds or `timeout` expires
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
