//! Unified service bootstrap utilities
//!
//! Startup banner and logging initialization shared by the IED binaries.

use crate::bootstrap_args::ServiceArgs;
use crate::logging::{self, LogConfig};
use tracing::info;

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name (e.g., "iedsrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
    /// Default port
    pub default_port: u16,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(name: impl Into<String>, description: impl Into<String>, default_port: u16) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.into(),
            default_port,
        }
    }
}

/// Print unified startup banner for any service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = match service.name.as_str() {
        "iedsrv" => {
            r#"
 ██╗███████╗██████╗ ███████╗██████╗ ██╗   ██╗
 ██║██╔════╝██╔══██╗██╔════╝██╔══██╗██║   ██║
 ██║█████╗  ██║  ██║███████╗██████╔╝██║   ██║
 ██║██╔══╝  ██║  ██║╚════██║██╔══██╗╚██╗ ██╔╝
 ██║███████╗██████╔╝███████║██║  ██║ ╚████╔╝
 ╚═╝╚══════╝╚═════╝ ╚══════╝╚═╝  ╚═╝  ╚═══╝
            "#
        },
        _ => "",
    };

    if !banner.is_empty() {
        info!("{}", banner);
    }
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!(" Default Port: {}", service.default_port);
}

/// Build the logger configuration for a service from its startup arguments
///
/// Log root directory priority:
/// 1. `IED_LOG_DIR` environment variable
/// 2. `--log-dir` argument
/// 3. Default "logs"
pub fn log_config_for(service: &ServiceInfo, args: &ServiceArgs) -> LogConfig {
    logging::init_log_root(args.log_dir.as_deref());
    LogConfig {
        service_name: service.name.clone(),
        log_dir: logging::get_log_root().join(&service.name),
        console_level: args.parse_log_level(),
        no_color: args.no_color,
        ..Default::default()
    }
}

/// Initialize logging for a service with standard configuration
pub fn init_logging(service: &ServiceInfo, args: &ServiceArgs) -> anyhow::Result<()> {
    logging::init_with_config(log_config_for(service, args))
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(())
}
