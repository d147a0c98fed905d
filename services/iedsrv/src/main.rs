//! IEC 61850 Data-Model Server (`iedsrv`)
//!
//! Serves the battery data model and feeds `ZBAT.Vol` from the update loop.

use std::sync::Arc;

use clap::Parser;
use common::service_bootstrap::ServiceInfo;
use common::ServiceArgs;
use iec61850_model::FunctionalConstraint;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use iedsrv::{battery, AccessPolicy, IedServer, ServerConfig, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(name = "iedsrv", version, about = "IEC 61850 data-model server")]
struct Args {
    #[command(flatten)]
    service: ServiceArgs,

    /// TCP port to listen on (overrides the configuration)
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let service_info = ServiceInfo::new(
        "iedsrv",
        "IEC 61850 Data-Model Server - Battery System",
        DEFAULT_PORT,
    );
    common::service_bootstrap::init_logging(&service_info, &args.service)?;
    common::logging::enable_sighup_log_reopen();
    if !args.service.no_color {
        common::service_bootstrap::print_startup_banner(&service_info);
    }

    let mut config = ServerConfig::load(args.service.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(filter) = config.log_level.as_deref() {
        if let Err(e) = common::logging::set_log_level(filter) {
            warn!("Ignoring configured log level: {}", e);
        }
    }
    debug!("Log filter: {}", common::logging::get_log_level());
    // Clients may rename the name plate vendor
    config
        .write_policy
        .entry(FunctionalConstraint::Description)
        .or_insert(AccessPolicy::Allow);

    let model = battery::build_model()?;
    if args.service.validate {
        info!(
            "Validation completed successfully: {} nodes in model '{}'",
            model.node_count(),
            model.ied_name()
        );
        return Ok(());
    }

    let port = config.port;
    let interval = config.update_interval();
    let server = Arc::new(IedServer::new(model, config)?);

    if let Err(e) = server.start(port).await {
        error!("Starting server failed: {}", e);
        return Err(e.into());
    }

    let cancel = CancellationToken::new();
    let signals = common::shutdown::cancel_on_shutdown(cancel.clone());
    let updater = tokio::spawn(battery::run_update_loop(
        Arc::clone(&server),
        interval,
        cancel.clone(),
    ));

    cancel.cancelled().await;
    if let Err(e) = signals.await {
        error!("Signal task failed: {}", e);
    }
    match updater.await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => error!("Update loop failed: {}", e),
        Err(e) => error!("Update loop task panicked: {}", e),
    }

    server.stop().await;
    info!("Service shutdown complete");
    Ok(())
}
