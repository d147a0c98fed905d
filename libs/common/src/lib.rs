//! Basic library shared by the IED services
//!
//! Provides:
//! - logging initialization and runtime level changes
//! - layered configuration loading (defaults, file, environment)
//! - common command-line arguments and startup helpers
//! - graceful shutdown signal handling

pub mod bootstrap_args;
pub mod config_loader;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use config_loader::load_layered;
pub use service_bootstrap::ServiceInfo;
