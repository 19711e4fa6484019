//! Field Device Acquisition Service (`acqsrv`)

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use acqsrv::core::bootstrap::{self, Args};
use acqsrv::core::transport::ModbusTcpConnector;
use acqsrv::storage::SqliteStore;
use acqsrv::AcquisitionService;
use common::shutdown::wait_for_shutdown;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = bootstrap::load_configuration(&args)?;

    // Validation mode: validate and exit
    if args.validate {
        bootstrap::validate_configuration(&config)?;
        println!("Configuration {} is valid", args.config.display());
        return Ok(());
    }

    let log_config = bootstrap::initialize_logging(&config, args.no_color)?;
    let retention_task = common::logging::start_log_retention_task(
        log_config.log_dir.clone(),
        log_config.retention_days,
    );

    info!(
        "Starting {} v{} with {}",
        config.service.name,
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );
    bootstrap::validate_configuration(&config)?;

    let store = SqliteStore::connect(&config.database.path)
        .await
        .with_context(|| format!("opening database {}", config.database.path))?;
    let service = AcquisitionService::build(&config, Arc::new(ModbusTcpConnector), Arc::new(store))?;

    let token = CancellationToken::new();
    let polling = service.start_polling(token.clone());

    if config.service.api.enabled {
        let bind_address = config.service.api.bind_address.clone();
        let listener = tokio::net::TcpListener::bind(&bind_address)
            .await
            .with_context(|| format!("binding API to {}", bind_address))?;
        info!("API listening on {}", bind_address);

        if let Err(e) = axum::serve(listener, service.router())
            .with_graceful_shutdown(wait_for_shutdown())
            .await
        {
            error!("API server error: {}", e);
        }
    } else {
        wait_for_shutdown().await;
    }

    info!("Shutdown requested, waiting for the current cycle");
    token.cancel();
    if let Err(e) = polling.await {
        error!("Polling task ended abnormally: {}", e);
    }
    retention_task.abort();

    info!("{} stopped", config.service.name);
    Ok(())
}
