//! IEC 61850 client (`iedclient`)
//!
//! Connects to an `iedsrv`, renames the battery name plate vendor and reads
//! the value back.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use common::service_bootstrap::ServiceInfo;
use common::ServiceArgs;
use errors::{IedErrorTrait, IedResult};
use iec61850_model::{FunctionalConstraint, Value};
use tracing::warn;

use iedsrv::{IedConnection, DEFAULT_PORT};

/// Vendor reference as addressed by clients, with the IED-prefixed device name
const VENDOR_REFERENCE: &str = "testmodelBattery/ZBAT.NamPlt.vendor";
const NEW_VENDOR: &str = "NewBattery";
const CONNECT_ATTEMPTS: u32 = 3;

#[derive(Parser, Debug)]
#[command(name = "iedclient", version, about = "IEC 61850 battery client")]
struct Args {
    /// Server host
    #[arg(default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Directory for log files
    #[arg(long, env = "IED_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

impl Args {
    fn service_args(&self) -> ServiceArgs {
        ServiceArgs {
            log_level: self.log_level.clone(),
            log_dir: self.log_dir.clone(),
            no_color: self.no_color,
            ..Default::default()
        }
    }
}

async fn connect(host: &str, port: u16) -> IedResult<IedConnection> {
    let mut attempt = 1;
    loop {
        match IedConnection::connect(host, port).await {
            Ok(connection) => return Ok(connection),
            Err(e) if e.is_retryable() && attempt < CONNECT_ATTEMPTS => {
                warn!("Connect attempt {}/{} failed: {}", attempt, CONNECT_ATTEMPTS, e);
                tokio::time::sleep(Duration::from_millis(e.retry_delay_ms())).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let service_info = ServiceInfo::new("iedclient", "IEC 61850 battery client", DEFAULT_PORT);
    if let Err(e) = common::service_bootstrap::init_logging(&service_info, &args.service_args()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let mut connection = match connect(&args.host, args.port).await {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("Failed to connect to {}:{}: {}", args.host, args.port, e);
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = connection
        .write(VENDOR_REFERENCE, FunctionalConstraint::Description, NEW_VENDOR)
        .await
    {
        println!("failed to write {} ({})", VENDOR_REFERENCE, e);
    }

    match connection
        .read(VENDOR_REFERENCE, FunctionalConstraint::Description)
        .await
    {
        Ok(Value::VisibleString(vendor)) => println!("read string value: {}", vendor),
        Ok(other) => println!("unexpected value type {}: {}", other.type_name(), other),
        Err(e) => println!("failed to read {} ({})", VENDOR_REFERENCE, e),
    }

    if let Err(e) = connection.close().await {
        eprintln!("Error while closing connection: {}", e);
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use common::service_bootstrap::log_config_for;

    #[test]
    fn test_logging_goes_through_service_bootstrap() {
        let args = Args::try_parse_from(["iedclient", "-l", "debug", "--no-color", "10.0.0.5", "10102"])
            .unwrap();
        assert_eq!(args.host, "10.0.0.5");
        assert_eq!(args.port, 10102);

        let service_info = ServiceInfo::new("iedclient", "test", DEFAULT_PORT);
        let config = log_config_for(&service_info, &args.service_args());
        assert_eq!(config.service_name, "iedclient");
        assert_eq!(config.console_level, tracing::Level::DEBUG);
        assert!(config.no_color);
        assert!(config.log_dir.ends_with("iedclient"));
    }

    #[tokio::test]
    async fn test_connect_gives_up_on_refused_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect("127.0.0.1", port).await.err().unwrap();
        assert!(err.is_retryable());
    }
}
