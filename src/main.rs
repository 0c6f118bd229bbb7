//! imgshift - An image conversion server.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imgshift::{
    codec::StandardCodec,
    config::Config,
    server::{create_router, RouterConfig},
    store::{EvictionLedger, OutputStore},
    task::{BoundedExecutor, ConversionService},
};

/// How long to wait for dispatched conversions on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    print_banner();

    let max_upload_bytes = config.max_upload_bytes();
    info!("Configuration:");
    info!("  Output directory: {}", config.output_dir);
    info!(
        "  Max upload size: {} ({} bytes)",
        config.max_upload_size, max_upload_bytes
    );
    info!("  Concurrent conversions: {}", config.max_concurrent_tasks);
    info!(
        "  Eviction: after {} downloads, checked every {}s",
        config.eviction_threshold, config.sweep_interval
    );
    info!("  pngquant: {}", config.pngquant_path);

    // Assemble the conversion pipeline
    let ledger = Arc::new(EvictionLedger::new(config.eviction_threshold));
    let store = OutputStore::with_ledger(&config.output_dir, Arc::clone(&ledger));
    if let Err(e) = store.ensure_dir().await {
        // Conversions retry directory creation, so this is not fatal
        warn!("  {}", e);
    }

    let service = ConversionService::new(
        StandardCodec::with_pngquant(&config.pngquant_path),
        store,
        BoundedExecutor::new(config.max_concurrent_tasks),
    );

    let sweeper = ledger.spawn_sweeper(config.sweep_period());

    let router = create_router(service.clone(), build_router_config(&config, max_upload_bytes));

    // Bind and serve
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!(
        "    curl -F picture=@photo.jpg -F format=webp http://{}/upload",
        addr
    );
    info!("    curl http://{}/status/<md5>", addr);
    info!("    curl -O http://{}/download/<md5>", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Dispatched conversions finish before the process exits
    if !service.shutdown(SHUTDOWN_GRACE).await {
        warn!("Exiting with conversions still in flight");
    }
    sweeper.abort();

    if let Err(e) = result {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

/// Resolve once Ctrl-C is received.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("██╗███╗   ███╗ ██████╗ ███████╗██╗  ██╗██╗███████╗████████╗");
    info!("██║████╗ ████║██╔════╝ ██╔════╝██║  ██║██║██╔════╝╚══██╔══╝");
    info!("██║██╔████╔██║██║  ███╗███████╗███████║██║█████╗     ██║   ");
    info!("██║██║╚██╔╝██║██║   ██║╚════██║██╔══██║██║██╔══╝     ██║   ");
    info!("██║██║ ╚═╝ ██║╚██████╔╝███████║██║  ██║██║██║        ██║   ");
    info!("╚═╝╚═╝     ╚═╝ ╚═════╝ ╚══════╝╚═╝  ╚═╝╚═╝╚═╝        ╚═╝   ");
    info!("");
    info!("                                                   v{}", version);
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "imgshift=debug,tower_http=debug"
    } else {
        "imgshift=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application Config.
fn build_router_config(config: &Config, max_upload_bytes: usize) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_max_upload_size(max_upload_bytes);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}
